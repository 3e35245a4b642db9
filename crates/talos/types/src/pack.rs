//! Evidence-pack manifest contracts.
//!
//! An evidence pack is a sealed container tying one decision to its policy
//! evaluation, state transition and human attestations, suitable for audit,
//! insurance or regulator submission.

use crate::common::{Actor, AssetRef, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Manifest schema version this crate produces and verifies.
pub const PACK_VERSION: &str = "1.0";

/// What was decided, for which asset, by which system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    #[serde(rename = "type")]
    pub outcome_type: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackDecision {
    pub decision_id: String,
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
    pub system: String,
    pub asset_ref: AssetRef,
    pub outcome: DecisionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlg {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

/// Reference to input data: the original stays external, only its hash is
/// retained.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextRef {
    pub uri: String,
    pub hash: String,
    pub hash_alg: HashAlg,
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redaction_profile: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackEvaluationResult {
    pub allowed: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// The policy evaluation that produced the decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackPolicyRef {
    pub policy_id: String,
    pub policy_version: String,
    pub engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_trace_ref: Option<String>,
    pub evaluation_result: PackEvaluationResult,
}

/// Optional model/runtime provenance for AI-assisted decisions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRuntimeRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_image_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbom_ref: Option<String>,
}

/// The state transition the decision drove.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackStateTransition {
    pub machine_id: String,
    pub machine_version: String,
    pub from: String,
    pub to: String,
    pub trigger: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_token_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttestationKind {
    OrgAttestation,
    HumanApproval,
    HumanOverride,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// A human or organizational sign-off captured in the pack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackAttestation {
    #[serde(rename = "type")]
    pub kind: AttestationKind,
    pub actor: Actor,
    pub role: String,
    pub auth_context: AuthContext,
    pub signed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Hash-chain anchors tying the pack into the evidence ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegrityRefs {
    pub prev_hash: String,
    pub chain_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ref: Option<String>,
    #[serde(default)]
    pub external_anchor_refs: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    SafetyCritical,
    Operational,
    General,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionStrategy {
    CryptoShredding,
    Tombstone,
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Retention {
    pub class: RetentionClass,
    pub min_retention_days: u32,
    pub deletion_strategy: DeletionStrategy,
}

impl Retention {
    /// Ten-year, never-deleted retention used for break-glass evidence.
    pub fn safety_critical() -> Self {
        Self {
            class: RetentionClass::SafetyCritical,
            min_retention_days: 3650,
            deletion_strategy: DeletionStrategy::None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiClass {
    PiiNone,
    PiiPresent,
    PiiMasked,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Privacy {
    pub pii_class: PiiClass,
    /// Country code, e.g. `US` or `KR`.
    pub data_residency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masking_applied: Option<bool>,
}

/// The sealed manifest. Hashing covers exactly this structure in canonical
/// form, so field additions are a schema version bump, not a patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackManifest {
    pub pack_version: String,
    pub decision: PackDecision,
    pub context_refs: Vec<ContextRef>,
    pub policy: PackPolicyRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_runtime: Option<ModelRuntimeRef>,
    pub state_transition: PackStateTransition,
    pub attestations: Vec<PackAttestation>,
    pub integrity: IntegrityRefs,
    pub retention: Retention,
    pub privacy: Privacy,
}

/// Stored pack row: the manifest plus its seal hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackRecord {
    pub pack_id: String,
    pub tenant_id: TenantId,
    pub decision_id: String,
    pub pack_version: String,
    pub manifest: PackManifest,
    pub pack_hash: String,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-check verification outcome, returned as data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackChecks {
    pub hash_match: bool,
    pub version_valid: bool,
    pub context_refs_present: bool,
    pub attestations_present: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifyPackResult {
    pub valid: bool,
    pub checks: PackChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
