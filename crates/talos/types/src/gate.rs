//! State-machine, gate-token and transition contracts.

use crate::common::{ActorKind, AssetRef, TenantId};
use crate::policy::ActionType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A state in an asset lifecycle, e.g. `SERVICEABLE` or `GROUNDED`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub state_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_initial: bool,
    #[serde(default)]
    pub is_terminal: bool,
}

/// Enforcement strength of one transition edge.
///
/// SHADOW logs only; SOFT checks requirements and reports failures; HARD
/// additionally demands a valid gate token (or an explicit override).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateMode {
    Shadow,
    Soft,
    Hard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    PolicyDecision,
    HumanAction,
    SystemEvent,
    Override,
}

/// Policy outcome a gate may demand before letting a transition through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequiredPolicyResult {
    Allow,
    AllowOrAttestation,
}

/// What must be supplied before a transition is admitted through its gate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GateRequirement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_policy_result: Option<RequiredPolicyResult>,
    #[serde(default)]
    pub required_attestations: Vec<String>,
    #[serde(default)]
    pub required_evidence_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

/// One directed edge of the lifecycle graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    pub transition_id: String,
    pub from: String,
    pub to: String,
    pub name: String,
    pub trigger_type: TriggerType,
    pub gate_mode: GateMode,
    #[serde(default)]
    pub gate_requirements: GateRequirement,
    #[serde(default)]
    pub allow_override: bool,
}

/// One versioned asset lifecycle. Treated as immutable per (id, version).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateMachineDefinition {
    pub machine_id: String,
    pub version: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Operational domain, e.g. `airworthiness` or `flight-ops`.
    pub domain: String,
    pub states: Vec<StateDefinition>,
    pub transitions: Vec<TransitionDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Active,
    Used,
    Expired,
    Revoked,
}

/// Short-lived, single-use authorization for one exact transition of one
/// asset. Expiry is data; a token past `expires_at` is inert, not swept.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateToken {
    pub token_id: String,
    pub tenant_id: TenantId,
    pub machine_id: String,
    pub machine_version: String,
    pub asset_ref: AssetRef,
    pub from: String,
    pub to: String,
    pub transition_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TokenStatus,
    pub issued_by: String,
}

/// An attestation supplied with a transition request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionAttestation {
    pub role: String,
    pub actor_id: String,
    pub actor_kind: ActorKind,
}

/// The slice of a policy evaluation a gate needs: the result is attached to
/// the request as opaque input, the gate never calls the policy engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvalSummary {
    pub policy_id: String,
    pub policy_version: String,
    pub allowed: bool,
    pub final_action: ActionType,
}

/// Break-glass justification carried on an overridden transition request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverrideJustification {
    pub reason: String,
    pub approved_by: String,
    pub role: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub tenant_id: TenantId,
    pub machine_id: String,
    pub asset_ref: AssetRef,
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_token_id: Option<String>,
    #[serde(default)]
    pub attestations: Vec<TransitionAttestation>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_eval: Option<PolicyEvalSummary>,
    #[serde(rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_justification: Option<OverrideJustification>,
    pub triggered_by: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionResult {
    Committed,
    Denied,
    Overridden,
}

/// Outcome of one transition attempt. Append-only, one per attempt; DENIED
/// attempts keep the asset state untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub transition_record_id: String,
    pub tenant_id: TenantId,
    pub machine_id: String,
    pub machine_version: String,
    pub asset_ref: AssetRef,
    pub from: String,
    pub to: String,
    pub transition_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_token_id: Option<String>,
    pub gate_mode: GateMode,
    pub result: TransitionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
    #[serde(default)]
    pub attestations: Vec<TransitionAttestation>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    /// `policy_id@version` of the evaluation attached to the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_eval_ref: Option<String>,
    /// Validation failures that produced a DENIED result.
    #[serde(default)]
    pub denial_reasons: Vec<String>,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
}

/// Current lifecycle position of one asset. Upserted after every committed
/// or overridden transition, never after a denied one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetState {
    pub tenant_id: TenantId,
    pub machine_id: String,
    pub asset_ref: AssetRef,
    pub current_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}
