//! Pure validation over machine definitions, gate requirements and tokens.

use crate::error::{GateError, GateResult};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use talos_types::gate::{
    GateToken, RequiredPolicyResult, StateMachineDefinition, TransitionDefinition,
    TransitionRequest,
};
use talos_types::policy::ActionType;

/// Structural checks on a machine definition before it is registered.
pub fn validate_definition(definition: &StateMachineDefinition) -> GateResult<()> {
    if definition.machine_id.is_empty() || definition.version.is_empty() {
        return Err(GateError::InvalidDefinition(
            "machine_id and version are required".into(),
        ));
    }
    if definition.states.is_empty() {
        return Err(GateError::InvalidDefinition("a machine needs states".into()));
    }

    let mut state_ids = HashSet::new();
    for state in &definition.states {
        if !state_ids.insert(state.state_id.as_str()) {
            return Err(GateError::InvalidDefinition(format!(
                "duplicate state_id {}",
                state.state_id
            )));
        }
    }
    let initial_count = definition.states.iter().filter(|s| s.is_initial).count();
    if initial_count != 1 {
        return Err(GateError::InvalidDefinition(format!(
            "expected exactly one initial state, found {initial_count}"
        )));
    }

    let mut transition_ids = HashSet::new();
    for transition in &definition.transitions {
        if !transition_ids.insert(transition.transition_id.as_str()) {
            return Err(GateError::InvalidDefinition(format!(
                "duplicate transition_id {}",
                transition.transition_id
            )));
        }
        for endpoint in [&transition.from, &transition.to] {
            if !state_ids.contains(endpoint.as_str()) {
                return Err(GateError::InvalidDefinition(format!(
                    "transition {} references unknown state {endpoint}",
                    transition.transition_id
                )));
            }
        }
    }
    Ok(())
}

/// The machine's single initial state id.
pub fn initial_state(definition: &StateMachineDefinition) -> Option<&str> {
    definition
        .states
        .iter()
        .find(|s| s.is_initial)
        .map(|s| s.state_id.as_str())
}

/// The edge matching (from, to), if defined.
pub fn find_transition<'a>(
    definition: &'a StateMachineDefinition,
    from: &str,
    to: &str,
) -> Option<&'a TransitionDefinition> {
    definition
        .transitions
        .iter()
        .find(|t| t.from == from && t.to == to)
}

/// Evaluate an edge's gate requirements against what the request supplies.
/// Returns every failure, not just the first, so a denial record names all
/// unmet requirements.
pub fn requirement_failures(
    edge: &TransitionDefinition,
    request: &TransitionRequest,
) -> Vec<String> {
    let mut failures = Vec::new();
    let requirements = &edge.gate_requirements;

    if let Some(required) = requirements.required_policy_result {
        match &request.policy_eval {
            None => failures.push("policy evaluation result required but not supplied".into()),
            Some(eval) => {
                let satisfied = match required {
                    RequiredPolicyResult::Allow => {
                        eval.allowed && eval.final_action == ActionType::Allow
                    }
                    RequiredPolicyResult::AllowOrAttestation => {
                        eval.allowed
                            && matches!(
                                eval.final_action,
                                ActionType::Allow | ActionType::RequireAttestation
                            )
                    }
                };
                if !satisfied {
                    failures.push(format!(
                        "policy {}@{} returned {} (allowed={}), gate requires {:?}",
                        eval.policy_id, eval.policy_version, eval.final_action, eval.allowed, required
                    ));
                }
            }
        }
    }

    for role in &requirements.required_attestations {
        if !request.attestations.iter().any(|a| &a.role == role) {
            failures.push(format!("missing attestation from role {role}"));
        }
    }

    let required_refs = requirements.required_evidence_types.len();
    if request.evidence_refs.len() < required_refs {
        failures.push(format!(
            "{} evidence reference(s) supplied, {} required ({})",
            request.evidence_refs.len(),
            required_refs,
            requirements.required_evidence_types.join(", ")
        ));
    }

    failures
}

/// Binding mismatches between a token and the commit request. All mismatches
/// are reported together.
pub fn token_mismatches(token: &GateToken, request: &TransitionRequest) -> Vec<String> {
    let mut mismatches = Vec::new();
    if token.tenant_id != request.tenant_id {
        mismatches.push(format!(
            "tenant mismatch: token is for {}",
            token.tenant_id
        ));
    }
    if token.machine_id != request.machine_id {
        mismatches.push(format!(
            "machine mismatch: token is for {}",
            token.machine_id
        ));
    }
    if token.asset_ref != request.asset_ref {
        mismatches.push(format!("asset mismatch: token is for {}", token.asset_ref));
    }
    if token.from != request.from || token.to != request.to {
        mismatches.push(format!(
            "transition mismatch: token authorizes {} -> {}",
            token.from, token.to
        ));
    }
    mismatches
}

pub fn is_expired(token: &GateToken, now: DateTime<Utc>) -> bool {
    now > token.expires_at
}
