//! Override lifecycle: create, approve, reject, execute.

use crate::error::{GovernanceError, GovernanceResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use talos_pack::{BuildPack, PackAssembler};
use talos_storage::{OverrideStore, OverrideUpdate, StorageError};
use talos_types::governance::{
    OverrideApproval, OverrideKpis, OverrideRecord, OverrideRequest, OverrideStatus,
};
use talos_types::pack::{
    AttestationKind, AuthContext, ContextRef, DecisionOutcome, HashAlg, IntegrityRefs,
    PackAttestation, PackDecision, PackEvaluationResult, PackPolicyRef, PackRecord,
    PackStateTransition, PiiClass, Privacy, Retention,
};
use talos_types::{Actor, TenantId};
use tracing::{info, warn};
use uuid::Uuid;

pub struct OverrideGovernance {
    store: Arc<dyn OverrideStore>,
    packs: Arc<dyn PackAssembler>,
}

impl OverrideGovernance {
    pub fn new(store: Arc<dyn OverrideStore>, packs: Arc<dyn PackAssembler>) -> Self {
        Self { store, packs }
    }

    /// Open a break-glass request. With no required approvals the record is
    /// born APPROVED and resolved; otherwise it waits in PENDING_APPROVAL.
    pub async fn create_override(
        &self,
        request: OverrideRequest,
    ) -> GovernanceResult<OverrideRecord> {
        if request.reason_text.trim().is_empty() {
            return Err(GovernanceError::Validation("reason_text is required".into()));
        }
        if request.requested_by.is_empty() {
            return Err(GovernanceError::Validation("requested_by is required".into()));
        }
        if request.duration_minutes <= 0 {
            return Err(GovernanceError::Validation(
                "duration_minutes must be positive".into(),
            ));
        }

        let now = Utc::now();
        let auto_approved = request.required_approvals.is_empty();
        let record = OverrideRecord {
            override_id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id,
            reason_code: request.reason_code,
            reason_text: request.reason_text,
            impact_scope: request.impact_scope,
            duration_minutes: request.duration_minutes,
            machine_id: request.machine_id,
            asset_ref: request.asset_ref,
            from_state: request.from_state,
            to_state: request.to_state,
            transition_record_id: None,
            required_approvals: request.required_approvals,
            approvals: vec![],
            status: if auto_approved {
                OverrideStatus::Approved
            } else {
                OverrideStatus::PendingApproval
            },
            evidence_pack_id: None,
            requested_by: request.requested_by,
            requested_at: now,
            resolved_at: auto_approved.then_some(now),
        };
        self.store.insert_override(record.clone()).await?;
        warn!(
            override_id = %record.override_id,
            tenant = %record.tenant_id,
            reason_code = %record.reason_code,
            status = %record.status,
            "break-glass override requested"
        );
        Ok(record)
    }

    /// Record one role's approval. The completeness check (every required
    /// role present) runs against a single consistent read inside the store.
    pub async fn approve_override(
        &self,
        override_id: &str,
        approval: OverrideApproval,
    ) -> GovernanceResult<OverrideRecord> {
        let record = self.get_override(override_id).await?;
        if !record.required_approvals.contains(&approval.role) {
            return Err(GovernanceError::Validation(format!(
                "role {} is not among required approvals ({})",
                approval.role,
                record.required_approvals.join(", ")
            )));
        }
        let record = self
            .store
            .apply_approval(override_id, approval)
            .await
            .map_err(|e| match e {
                StorageError::Conflict(msg) | StorageError::InvariantViolation(msg) => {
                    GovernanceError::Validation(msg)
                }
                other => other.into(),
            })?;
        info!(
            override_id,
            status = %record.status,
            approvals = record.approvals.len(),
            required = record.required_approvals.len(),
            "override approval recorded"
        );
        Ok(record)
    }

    /// Reject, with the actor and reason appended to the audit text. Only
    /// EXECUTED and already-REJECTED records are immune.
    pub async fn reject_override(
        &self,
        override_id: &str,
        actor: &str,
        reason: &str,
    ) -> GovernanceResult<OverrideRecord> {
        let record = self
            .store
            .transition_override(
                override_id,
                &[
                    OverrideStatus::Requested,
                    OverrideStatus::PendingApproval,
                    OverrideStatus::Approved,
                    OverrideStatus::Expired,
                ],
                OverrideUpdate {
                    status: Some(OverrideStatus::Rejected),
                    resolved_at: Some(Utc::now()),
                    annotate_reason: Some(format!(" [REJECTED by {actor}: {reason}]")),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_transition_error(override_id))?;
        info!(override_id, actor, "override rejected");
        Ok(record)
    }

    /// Execute an APPROVED override: verify the authorization window, seal
    /// the mandatory evidence pack, then mark EXECUTED.
    ///
    /// An elapsed window durably flips the record to EXPIRED before the call
    /// fails, so a stale approval is revealed as expired exactly once and is
    /// never executable afterwards.
    pub async fn execute_override(&self, override_id: &str) -> GovernanceResult<OverrideRecord> {
        let record = self.get_override(override_id).await?;
        if record.status != OverrideStatus::Approved {
            return Err(GovernanceError::WrongStatus {
                override_id: override_id.to_string(),
                status: record.status.to_string(),
                expected: OverrideStatus::Approved.to_string(),
            });
        }

        let expires_at = record.expires_at();
        if Utc::now() > expires_at {
            self.store
                .transition_override(
                    override_id,
                    &[OverrideStatus::Approved],
                    OverrideUpdate {
                        status: Some(OverrideStatus::Expired),
                        resolved_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            warn!(override_id, %expires_at, "override expired before execution");
            return Err(GovernanceError::Expired {
                override_id: override_id.to_string(),
                expired_at: expires_at,
            });
        }

        let pack = self.seal_evidence(&record).await?;
        let record = self
            .store
            .transition_override(
                override_id,
                &[OverrideStatus::Approved],
                OverrideUpdate {
                    status: Some(OverrideStatus::Executed),
                    evidence_pack_id: Some(pack.pack_id.clone()),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_transition_error(override_id))?;
        warn!(
            override_id,
            pack_id = %pack.pack_id,
            asset = %record.asset_ref,
            "break-glass override executed"
        );
        Ok(record)
    }

    pub async fn get_override(&self, override_id: &str) -> GovernanceResult<OverrideRecord> {
        self.store
            .get_override(override_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(override_id.to_string()))
    }

    pub async fn get_overrides_by_tenant(
        &self,
        tenant: &TenantId,
        status: Option<OverrideStatus>,
    ) -> GovernanceResult<Vec<OverrideRecord>> {
        Ok(self.store.list_overrides(tenant, status).await?)
    }

    /// Oversight metrics: totals, breakdowns and mean time-to-resolution.
    pub async fn get_override_kpis(&self, tenant: &TenantId) -> GovernanceResult<OverrideKpis> {
        let records = self.store.list_overrides(tenant, None).await?;
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut by_reason_code: HashMap<String, usize> = HashMap::new();
        let mut by_impact_scope: HashMap<String, usize> = HashMap::new();
        let mut resolution_minutes = Vec::new();

        for record in &records {
            *by_status.entry(record.status.to_string()).or_default() += 1;
            *by_reason_code
                .entry(record.reason_code.to_string())
                .or_default() += 1;
            *by_impact_scope
                .entry(record.impact_scope.to_string())
                .or_default() += 1;
            if matches!(
                record.status,
                OverrideStatus::Approved | OverrideStatus::Executed
            ) {
                if let Some(resolved_at) = record.resolved_at {
                    let minutes = (resolved_at - record.requested_at).num_seconds() as f64 / 60.0;
                    resolution_minutes.push(minutes);
                }
            }
        }

        let avg_approval_minutes = if resolution_minutes.is_empty() {
            None
        } else {
            let mean = resolution_minutes.iter().sum::<f64>() / resolution_minutes.len() as f64;
            Some((mean * 100.0).round() / 100.0)
        };

        Ok(OverrideKpis {
            tenant_id: tenant.clone(),
            total_count: records.len(),
            by_status,
            by_reason_code,
            by_impact_scope,
            avg_approval_minutes,
        })
    }

    /// Break-glass evidence is always sealed with safety-critical retention
    /// and the approval set mapped to human-override attestations.
    async fn seal_evidence(&self, record: &OverrideRecord) -> GovernanceResult<PackRecord> {
        let now = Utc::now();
        let short_id: String = record
            .override_id
            .chars()
            .filter(|c| *c != '-')
            .take(8)
            .collect::<String>()
            .to_uppercase();
        let record_hash = talos_hash::hash_payload(
            &serde_json::to_value(record).map_err(talos_pack::PackError::Serialization)?,
        )
        .map_err(talos_pack::PackError::Serialization)?;

        let attestations = record
            .approvals
            .iter()
            .map(|approval| PackAttestation {
                kind: AttestationKind::HumanOverride,
                actor: Actor {
                    kind: approval.actor_kind,
                    id: approval.actor_id.clone(),
                },
                role: approval.role.clone(),
                auth_context: AuthContext {
                    method: "session".into(),
                    idp: None,
                    mfa: None,
                    key_id: None,
                },
                signed_at: approval.approved_at,
                signature_ref: None,
                reason: Some(record.reason_text.clone()),
            })
            .collect();

        let input = BuildPack {
            decision: PackDecision {
                decision_id: format!("OVERRIDE-{short_id}"),
                tenant_id: record.tenant_id.clone(),
                occurred_at: now,
                system: "talos-governance".into(),
                asset_ref: record.asset_ref.clone(),
                outcome: DecisionOutcome {
                    outcome_type: "override".into(),
                    value: "OVERRIDE_EXECUTED".into(),
                },
                confidence: None,
                extensions: None,
            },
            context_refs: vec![ContextRef {
                uri: format!("talos://overrides/{}", record.override_id),
                hash: record_hash.clone(),
                hash_alg: HashAlg::Sha256,
                captured_at: now,
                redaction_profile: None,
            }],
            policy: PackPolicyRef {
                policy_id: "override-governance".into(),
                policy_version: "v1".into(),
                engine: "talos-governance".into(),
                evaluation_trace_ref: None,
                evaluation_result: PackEvaluationResult {
                    allowed: true,
                    reasons: vec![record.reason_code.to_string()],
                    score: None,
                },
            },
            model_runtime: None,
            state_transition: PackStateTransition {
                machine_id: record.machine_id.clone(),
                machine_version: "latest".into(),
                from: record.from_state.clone(),
                to: record.to_state.clone(),
                trigger: "override".into(),
                gate_mode: None,
                gate_token_id: None,
            },
            attestations,
            integrity: IntegrityRefs {
                prev_hash: talos_hash::genesis_hash(),
                chain_hash: record_hash,
                checkpoint_ref: None,
                external_anchor_refs: vec![],
            },
            retention: Retention::safety_critical(),
            privacy: Privacy {
                pii_class: PiiClass::PiiPresent,
                data_residency: "US".into(),
                masking_applied: None,
            },
            evidence_ids: vec![],
        };
        Ok(self.packs.build_pack(input).await?)
    }
}

fn map_transition_error(override_id: &str) -> impl FnOnce(StorageError) -> GovernanceError {
    let override_id = override_id.to_string();
    move |e| match e {
        StorageError::NotFound(_) => GovernanceError::NotFound(override_id),
        StorageError::InvariantViolation(msg) => GovernanceError::Validation(msg),
        other => other.into(),
    }
}
