//! Transition authorization and commit.

use crate::error::{GateError, GateResult};
use crate::validator;
use chrono::{Duration, Utc};
use std::sync::Arc;
use talos_storage::{MachineRecord, MachineStore};
use talos_types::gate::{
    AssetState, GateMode, GateToken, StateMachineDefinition, TokenStatus, TransitionDefinition,
    TransitionRecord, TransitionRequest, TransitionResult,
};
use talos_types::{AssetRef, TenantId};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_TOKEN_TTL_MINUTES: i64 = 5;
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Registers machines, issues gate tokens and commits transitions.
pub struct StateMachineManager {
    store: Arc<dyn MachineStore>,
    token_ttl: Duration,
}

impl StateMachineManager {
    pub fn new(store: Arc<dyn MachineStore>) -> Self {
        Self {
            store,
            token_ttl: Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES),
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Register a machine version. Re-registering the same (id, version)
    /// replaces the stored definition.
    pub async fn register_machine(
        &self,
        definition: StateMachineDefinition,
        registered_by: &str,
    ) -> GateResult<MachineRecord> {
        validator::validate_definition(&definition)?;
        let record = MachineRecord {
            machine_id: definition.machine_id.clone(),
            version: definition.version.clone(),
            name: definition.name.clone(),
            domain: definition.domain.clone(),
            definition,
            registered_by: registered_by.to_string(),
            created_at: Utc::now(),
        };
        self.store.upsert_machine(record.clone()).await?;
        info!(
            machine_id = %record.machine_id,
            version = %record.version,
            registered_by,
            "state machine registered"
        );
        Ok(record)
    }

    pub async fn get_machine(
        &self,
        machine_id: &str,
        version: Option<&str>,
    ) -> GateResult<MachineRecord> {
        self.store
            .get_machine(machine_id, version)
            .await?
            .ok_or_else(|| GateError::MachineNotFound(machine_id.to_string()))
    }

    /// Pre-authorize a transition: verify the edge exists, the asset is in
    /// the right state and the gate requirements are satisfiable from what
    /// the request supplies, then issue a single-use token bound to the
    /// exact transition tuple. `ttl` shortens or lengthens the token window
    /// for this one call; `None` uses the manager default.
    pub async fn authorize_transition(
        &self,
        request: &TransitionRequest,
        ttl: Option<Duration>,
    ) -> GateResult<GateToken> {
        let machine = self.get_machine(&request.machine_id, None).await?;
        let edge = self.resolve_edge(&machine.definition, request)?;
        self.check_current_state(&machine.definition, request).await?;

        let failures = validator::requirement_failures(edge, request);
        if !failures.is_empty() {
            return Err(GateError::RequirementsUnsatisfied(failures.join("; ")));
        }

        let now = Utc::now();
        let token = GateToken {
            token_id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id.clone(),
            machine_id: machine.machine_id.clone(),
            machine_version: machine.version.clone(),
            asset_ref: request.asset_ref.clone(),
            from: request.from.clone(),
            to: request.to.clone(),
            transition_id: edge.transition_id.clone(),
            policy_version: request
                .policy_eval
                .as_ref()
                .map(|e| format!("{}@{}", e.policy_id, e.policy_version)),
            decision_id: None,
            issued_at: now,
            expires_at: now + ttl.unwrap_or(self.token_ttl),
            status: TokenStatus::Active,
            issued_by: request.triggered_by.clone(),
        };
        self.store.insert_token(token.clone()).await?;
        info!(
            token_id = %token.token_id,
            machine_id = %token.machine_id,
            asset = %token.asset_ref,
            from = %token.from,
            to = %token.to,
            "gate token issued"
        );
        Ok(token)
    }

    /// Attempt a transition. A requirement failure produces a persisted
    /// DENIED record (a normal outcome, not an error) with the asset state
    /// untouched; token misuse is an error and records nothing.
    pub async fn commit_transition(
        &self,
        request: TransitionRequest,
    ) -> GateResult<TransitionRecord> {
        let machine = self.get_machine(&request.machine_id, None).await?;
        let edge = self.resolve_edge(&machine.definition, &request)?.clone();
        self.check_current_state(&machine.definition, &request).await?;

        if let Some(justification) = &request.override_justification {
            if !edge.allow_override {
                return Err(GateError::RequirementsUnsatisfied(format!(
                    "transition {} does not permit override",
                    edge.transition_id
                )));
            }
            if justification.reason.is_empty() || justification.approved_by.is_empty() {
                return Err(GateError::RequirementsUnsatisfied(
                    "override requires a reason and an approver".into(),
                ));
            }
            let record = self
                .record_outcome(&machine, &edge, &request, TransitionResult::Overridden, vec![])
                .await?;
            self.advance_asset(&record).await?;
            warn!(
                machine_id = %record.machine_id,
                asset = %record.asset_ref,
                reason = %justification.reason,
                "transition overridden"
            );
            return Ok(record);
        }

        let mut failures = validator::requirement_failures(&edge, &request);
        if edge.gate_mode == GateMode::Hard && request.gate_token_id.is_none() {
            failures.push("HARD gate requires a gate token".into());
        }

        match edge.gate_mode {
            GateMode::Shadow => {
                // Log-only mode: failures are observed, never enforced.
                if !failures.is_empty() {
                    warn!(
                        machine_id = %machine.machine_id,
                        asset = %request.asset_ref,
                        failures = %failures.join("; "),
                        "shadow gate would have denied"
                    );
                }
            }
            GateMode::Soft | GateMode::Hard => {
                if !failures.is_empty() {
                    let record = self
                        .record_outcome(&machine, &edge, &request, TransitionResult::Denied, failures)
                        .await?;
                    warn!(
                        machine_id = %record.machine_id,
                        asset = %record.asset_ref,
                        reasons = %record.denial_reasons.join("; "),
                        "transition denied"
                    );
                    return Ok(record);
                }
            }
        }

        // Consume the token after validation, before recording the commit,
        // so a racing second commit loses at the CAS.
        if edge.gate_mode == GateMode::Hard {
            if let Some(token_id) = &request.gate_token_id {
                self.consume_token(token_id, &request).await?;
            }
        }

        let record = self
            .record_outcome(&machine, &edge, &request, TransitionResult::Committed, vec![])
            .await?;
        self.advance_asset(&record).await?;
        info!(
            machine_id = %record.machine_id,
            asset = %record.asset_ref,
            from = %record.from,
            to = %record.to,
            "transition committed"
        );
        Ok(record)
    }

    pub async fn get_asset_state(
        &self,
        tenant: &TenantId,
        machine_id: &str,
        asset_ref: &AssetRef,
    ) -> GateResult<Option<AssetState>> {
        Ok(self.store.get_asset_state(tenant, machine_id, asset_ref).await?)
    }

    /// Transition attempts for one asset, newest first.
    pub async fn get_transition_history(
        &self,
        tenant: &TenantId,
        machine_id: &str,
        asset_ref: &AssetRef,
        limit: Option<usize>,
    ) -> GateResult<Vec<TransitionRecord>> {
        Ok(self
            .store
            .list_transitions(tenant, machine_id, asset_ref, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await?)
    }

    fn resolve_edge<'a>(
        &self,
        definition: &'a StateMachineDefinition,
        request: &TransitionRequest,
    ) -> GateResult<&'a TransitionDefinition> {
        validator::find_transition(definition, &request.from, &request.to).ok_or_else(|| {
            GateError::UndefinedTransition {
                machine_id: definition.machine_id.clone(),
                from: request.from.clone(),
                to: request.to.clone(),
            }
        })
    }

    /// An asset with no recorded state is considered to sit in the machine's
    /// initial state.
    async fn check_current_state(
        &self,
        definition: &StateMachineDefinition,
        request: &TransitionRequest,
    ) -> GateResult<()> {
        let current = self
            .store
            .get_asset_state(&request.tenant_id, &request.machine_id, &request.asset_ref)
            .await?
            .map(|s| s.current_state)
            .or_else(|| validator::initial_state(definition).map(String::from));
        match current {
            Some(current) if current == request.from => Ok(()),
            Some(current) => Err(GateError::WrongCurrentState {
                asset: request.asset_ref.to_string(),
                current,
                requested_from: request.from.clone(),
            }),
            None => Err(GateError::InvalidDefinition(
                "machine has no initial state".into(),
            )),
        }
    }

    async fn consume_token(&self, token_id: &str, request: &TransitionRequest) -> GateResult<()> {
        let token = self
            .store
            .get_token(token_id)
            .await?
            .ok_or_else(|| GateError::TokenNotFound(token_id.to_string()))?;

        match token.status {
            TokenStatus::Active => {}
            TokenStatus::Expired => {
                return Err(GateError::TokenExpired {
                    token_id: token_id.to_string(),
                    expired_at: token.expires_at,
                })
            }
            TokenStatus::Used | TokenStatus::Revoked => {
                return Err(GateError::TokenConsumed(token_id.to_string()))
            }
        }
        if validator::is_expired(&token, Utc::now()) {
            // Record the expiry durably so the token can never race back in.
            self.store
                .update_token_status(token_id, TokenStatus::Active, TokenStatus::Expired)
                .await?;
            return Err(GateError::TokenExpired {
                token_id: token_id.to_string(),
                expired_at: token.expires_at,
            });
        }
        let mismatches = validator::token_mismatches(&token, request);
        if !mismatches.is_empty() {
            return Err(GateError::TokenInvalid {
                token_id: token_id.to_string(),
                reasons: mismatches.join("; "),
            });
        }

        match self
            .store
            .update_token_status(token_id, TokenStatus::Active, TokenStatus::Used)
            .await
        {
            Ok(_) => Ok(()),
            Err(talos_storage::StorageError::Conflict(_)) => {
                Err(GateError::TokenConsumed(token_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_outcome(
        &self,
        machine: &MachineRecord,
        edge: &TransitionDefinition,
        request: &TransitionRequest,
        result: TransitionResult,
        denial_reasons: Vec<String>,
    ) -> GateResult<TransitionRecord> {
        let record = TransitionRecord {
            transition_record_id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id.clone(),
            machine_id: machine.machine_id.clone(),
            machine_version: machine.version.clone(),
            asset_ref: request.asset_ref.clone(),
            from: request.from.clone(),
            to: request.to.clone(),
            transition_id: edge.transition_id.clone(),
            gate_token_id: request.gate_token_id.clone(),
            gate_mode: edge.gate_mode,
            result,
            override_reason: request
                .override_justification
                .as_ref()
                .map(|o| o.reason.clone()),
            attestations: request.attestations.clone(),
            evidence_refs: request.evidence_refs.clone(),
            policy_eval_ref: request
                .policy_eval
                .as_ref()
                .map(|e| format!("{}@{}", e.policy_id, e.policy_version)),
            denial_reasons,
            triggered_by: request.triggered_by.clone(),
            created_at: Utc::now(),
        };
        self.store.insert_transition(record.clone()).await?;
        Ok(record)
    }

    async fn advance_asset(&self, record: &TransitionRecord) -> GateResult<()> {
        self.store
            .upsert_asset_state(AssetState {
                tenant_id: record.tenant_id.clone(),
                machine_id: record.machine_id.clone(),
                asset_ref: record.asset_ref.clone(),
                current_state: record.to.clone(),
                last_transition_id: Some(record.transition_record_id.clone()),
                updated_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}
