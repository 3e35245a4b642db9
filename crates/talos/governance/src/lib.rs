//! Override governance engine.
//!
//! Accountable break-glass workflow: every override is requested with a
//! coded reason, approved by a fixed set of roles, time-boxed, and on
//! execution permanently documented in a safety-critical evidence pack.

#![deny(unsafe_code)]

mod engine;
mod error;

pub use engine::OverrideGovernance;
pub use error::{GovernanceError, GovernanceResult};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use talos_pack::EvidencePackBuilder;
    use talos_storage::memory::InMemoryTrustStorage;
    use talos_storage::{OverrideStore, PackStore};
    use talos_types::governance::{
        ImpactScope, OverrideApproval, OverrideRecord, OverrideRequest, OverrideStatus, ReasonCode,
    };
    use talos_types::pack::{DeletionStrategy, RetentionClass};
    use talos_types::{ActorKind, AssetRef, TenantId};
    use uuid::Uuid;

    fn governance() -> (OverrideGovernance, Arc<InMemoryTrustStorage>) {
        let store = Arc::new(InMemoryTrustStorage::new());
        let packs = Arc::new(EvidencePackBuilder::new(store.clone()));
        (OverrideGovernance::new(store.clone(), packs), store)
    }

    fn request(required: &[&str]) -> OverrideRequest {
        OverrideRequest {
            tenant_id: TenantId::new("t1"),
            reason_code: ReasonCode::EmergencySafety,
            reason_text: "runway incursion, relocate immediately".into(),
            impact_scope: ImpactScope::SingleAsset,
            duration_minutes: 60,
            machine_id: "airworthiness".into(),
            asset_ref: AssetRef::new("aircraft", "HL9406"),
            from_state: "GROUNDED".into(),
            to_state: "SERVICEABLE".into(),
            required_approvals: required.iter().map(|s| s.to_string()).collect(),
            requested_by: "ops".into(),
        }
    }

    fn approval(role: &str) -> OverrideApproval {
        OverrideApproval {
            role: role.into(),
            actor_id: format!("user-{role}"),
            actor_kind: ActorKind::Human,
            approved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn no_required_approvals_means_immediate_approval() {
        let (governance, _) = governance();
        let record = governance.create_override(request(&[])).await.unwrap();
        assert_eq!(record.status, OverrideStatus::Approved);
        assert!(record.resolved_at.is_some());
    }

    #[tokio::test]
    async fn unlisted_role_cannot_approve() {
        let (governance, _) = governance();
        let record = governance
            .create_override(request(&["DUTY_MANAGER"]))
            .await
            .unwrap();

        let err = governance
            .approve_override(&record.override_id, approval("INTERN"))
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_role_approval_is_rejected() {
        let (governance, _) = governance();
        let record = governance
            .create_override(request(&["DUTY_MANAGER", "SAFETY_OFFICER"]))
            .await
            .unwrap();

        governance
            .approve_override(&record.override_id, approval("DUTY_MANAGER"))
            .await
            .unwrap();
        let err = governance
            .approve_override(&record.override_id, approval("DUTY_MANAGER"))
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
    }

    #[tokio::test]
    async fn approvals_in_any_order_approve_exactly_once() {
        let (governance, _) = governance();
        let record = governance
            .create_override(request(&["DUTY_MANAGER", "SAFETY_OFFICER"]))
            .await
            .unwrap();
        assert_eq!(record.status, OverrideStatus::PendingApproval);

        let partial = governance
            .approve_override(&record.override_id, approval("SAFETY_OFFICER"))
            .await
            .unwrap();
        assert_eq!(partial.status, OverrideStatus::PendingApproval);
        assert!(partial.resolved_at.is_none());

        let complete = governance
            .approve_override(&record.override_id, approval("DUTY_MANAGER"))
            .await
            .unwrap();
        assert_eq!(complete.status, OverrideStatus::Approved);
        assert!(complete.resolved_at.is_some());

        // No further approvals are accepted once resolved.
        let err = governance
            .approve_override(&record.override_id, approval("SAFETY_OFFICER"))
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
    }

    #[tokio::test]
    async fn executing_a_pending_override_fails() {
        let (governance, _) = governance();
        let record = governance
            .create_override(request(&["DUTY_MANAGER"]))
            .await
            .unwrap();

        let err = governance
            .execute_override(&record.override_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::WrongStatus { .. }));
    }

    #[tokio::test]
    async fn execution_seals_a_safety_critical_pack() {
        let (governance, store) = governance();
        let record = governance.create_override(request(&[])).await.unwrap();

        let executed = governance
            .execute_override(&record.override_id)
            .await
            .unwrap();
        assert_eq!(executed.status, OverrideStatus::Executed);

        let pack_id = executed.evidence_pack_id.unwrap();
        let pack = store.get_pack(&pack_id).await.unwrap().unwrap();
        assert!(pack.decision_id.starts_with("OVERRIDE-"));
        assert_eq!(pack.decision_id.len(), "OVERRIDE-".len() + 8);
        assert_eq!(pack.manifest.retention.class, RetentionClass::SafetyCritical);
        assert_eq!(pack.manifest.retention.min_retention_days, 3650);
        assert_eq!(
            pack.manifest.retention.deletion_strategy,
            DeletionStrategy::None
        );

        // Re-execution of an already executed override fails.
        let err = governance
            .execute_override(&record.override_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::WrongStatus { .. }));
    }

    #[tokio::test]
    async fn approvals_become_pack_attestations() {
        let (governance, store) = governance();
        let record = governance
            .create_override(request(&["DUTY_MANAGER", "SAFETY_OFFICER"]))
            .await
            .unwrap();
        governance
            .approve_override(&record.override_id, approval("DUTY_MANAGER"))
            .await
            .unwrap();
        governance
            .approve_override(&record.override_id, approval("SAFETY_OFFICER"))
            .await
            .unwrap();

        let executed = governance
            .execute_override(&record.override_id)
            .await
            .unwrap();
        let pack = store
            .get_pack(&executed.evidence_pack_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pack.manifest.attestations.len(), 2);
        assert!(pack
            .manifest
            .attestations
            .iter()
            .any(|a| a.role == "SAFETY_OFFICER"));
    }

    #[tokio::test]
    async fn elapsed_window_durably_expires_on_execute() {
        let (governance, store) = governance();
        // Inserted directly so requested_at can sit in the past.
        let stale = OverrideRecord {
            override_id: Uuid::new_v4().to_string(),
            tenant_id: TenantId::new("t1"),
            reason_code: ReasonCode::MaintenanceRequired,
            reason_text: "stale".into(),
            impact_scope: ImpactScope::SingleAsset,
            duration_minutes: 60,
            machine_id: "airworthiness".into(),
            asset_ref: AssetRef::new("aircraft", "HL9406"),
            from_state: "GROUNDED".into(),
            to_state: "SERVICEABLE".into(),
            transition_record_id: None,
            required_approvals: vec![],
            approvals: vec![],
            status: OverrideStatus::Approved,
            evidence_pack_id: None,
            requested_by: "ops".into(),
            requested_at: Utc::now() - Duration::minutes(120),
            resolved_at: None,
        };
        store.insert_override(stale.clone()).await.unwrap();

        let err = governance
            .execute_override(&stale.override_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Expired { .. }));

        let stored = governance.get_override(&stale.override_id).await.unwrap();
        assert_eq!(stored.status, OverrideStatus::Expired);
        // The expiry flip resolves the record.
        assert!(stored.resolved_at.is_some());

        // Once revealed as expired, it stays unexecutable.
        let err = governance
            .execute_override(&stale.override_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::WrongStatus { .. }));
    }

    #[tokio::test]
    async fn rejection_annotates_the_audit_text() {
        let (governance, _) = governance();
        let record = governance
            .create_override(request(&["DUTY_MANAGER"]))
            .await
            .unwrap();

        let rejected = governance
            .reject_override(&record.override_id, "safety-board", "insufficient grounds")
            .await
            .unwrap();
        assert_eq!(rejected.status, OverrideStatus::Rejected);
        assert!(rejected
            .reason_text
            .ends_with("[REJECTED by safety-board: insufficient grounds]"));

        let err = governance
            .reject_override(&record.override_id, "safety-board", "again")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
    }

    #[tokio::test]
    async fn kpis_aggregate_by_status_reason_and_scope() {
        let (governance, _) = governance();
        governance.create_override(request(&[])).await.unwrap();
        let pending = governance
            .create_override(request(&["DUTY_MANAGER"]))
            .await
            .unwrap();
        governance
            .reject_override(&pending.override_id, "qa", "no")
            .await
            .unwrap();

        let kpis = governance
            .get_override_kpis(&TenantId::new("t1"))
            .await
            .unwrap();
        assert_eq!(kpis.total_count, 2);
        assert_eq!(kpis.by_status.get("APPROVED"), Some(&1));
        assert_eq!(kpis.by_status.get("REJECTED"), Some(&1));
        assert_eq!(kpis.by_reason_code.get("EMERGENCY_SAFETY"), Some(&2));
        assert_eq!(kpis.by_impact_scope.get("single_asset"), Some(&2));
        // The auto-approved record resolved instantly.
        let avg = kpis.avg_approval_minutes.unwrap();
        assert!(avg >= 0.0 && avg < 1.0);
    }

    #[tokio::test]
    async fn kpis_with_no_resolutions_report_no_average() {
        let (governance, _) = governance();
        governance
            .create_override(request(&["DUTY_MANAGER"]))
            .await
            .unwrap();

        let kpis = governance
            .get_override_kpis(&TenantId::new("t1"))
            .await
            .unwrap();
        assert_eq!(kpis.total_count, 1);
        assert!(kpis.avg_approval_minutes.is_none());
    }
}
