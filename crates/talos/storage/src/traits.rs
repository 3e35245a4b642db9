use crate::model::MachineRecord;
use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use talos_types::gate::{AssetState, GateToken, TokenStatus, TransitionRecord};
use talos_types::governance::{OverrideApproval, OverrideRecord, OverrideStatus};
use talos_types::ledger::{AppendEvidence, Checkpoint, EvidenceRecord};
use talos_types::pack::PackRecord;
use talos_types::policy::{PolicyDefinition, PolicyVersionRecord};
use talos_types::{AssetRef, TenantId};

/// Storage interface for the append-only evidence chain.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a record, computing `sequence_num`, `prev_hash`, `payload_hash`
    /// and `chain_hash` inside the store's atomic section. Two concurrent
    /// appends for one tenant must never observe the same head; backends
    /// provide either a serializable read-head-then-insert transaction or a
    /// uniqueness constraint on (tenant, sequence_num) with retry.
    async fn append_evidence(&self, input: AppendEvidence) -> StorageResult<EvidenceRecord>;

    /// Get one record by id.
    async fn get_evidence(&self, evidence_id: &str) -> StorageResult<Option<EvidenceRecord>>;

    /// The tenant's most recent record by sequence number.
    async fn chain_head(&self, tenant: &TenantId) -> StorageResult<Option<EvidenceRecord>>;

    /// All records with `sequence_num >= from_sequence`, ascending.
    async fn list_evidence(
        &self,
        tenant: &TenantId,
        from_sequence: u64,
    ) -> StorageResult<Vec<EvidenceRecord>>;

    /// The checkpoint with the highest `sequence_to` for the tenant.
    async fn latest_checkpoint(&self, tenant: &TenantId) -> StorageResult<Option<Checkpoint>>;

    /// Persist a sealed checkpoint row.
    async fn insert_checkpoint(&self, checkpoint: Checkpoint) -> StorageResult<()>;
}

/// Storage interface for versioned, immutable policy rule-sets.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Atomically deactivate the current active version of
    /// `definition.policy_id` (if any) and insert the new version as active.
    /// A duplicate (policy_id, version) pair is a conflict.
    async fn publish_version(
        &self,
        definition: PolicyDefinition,
        published_by: &str,
    ) -> StorageResult<PolicyVersionRecord>;

    /// The active version for a policy id.
    async fn get_active(&self, policy_id: &str) -> StorageResult<Option<PolicyVersionRecord>>;

    /// One exact published version, active or not.
    async fn get_version(
        &self,
        policy_id: &str,
        version: &str,
    ) -> StorageResult<Option<PolicyVersionRecord>>;
}

/// Storage interface for state machines, gate tokens, asset states and
/// transition records.
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Insert or replace a machine definition keyed by (machine_id, version).
    async fn upsert_machine(&self, record: MachineRecord) -> StorageResult<()>;

    /// Fetch a machine: an exact version, or the most recently registered one
    /// when `version` is `None`.
    async fn get_machine(
        &self,
        machine_id: &str,
        version: Option<&str>,
    ) -> StorageResult<Option<MachineRecord>>;

    async fn insert_token(&self, token: GateToken) -> StorageResult<()>;

    async fn get_token(&self, token_id: &str) -> StorageResult<Option<GateToken>>;

    /// Compare-and-swap on token status. Succeeds at most once per
    /// (expected → to) pair, which is what makes tokens single-use: a second
    /// ACTIVE→USED attempt is a conflict, not a silent no-op.
    async fn update_token_status(
        &self,
        token_id: &str,
        expected: TokenStatus,
        to: TokenStatus,
    ) -> StorageResult<GateToken>;

    async fn upsert_asset_state(&self, state: AssetState) -> StorageResult<()>;

    async fn get_asset_state(
        &self,
        tenant: &TenantId,
        machine_id: &str,
        asset_ref: &AssetRef,
    ) -> StorageResult<Option<AssetState>>;

    async fn insert_transition(&self, record: TransitionRecord) -> StorageResult<()>;

    /// Transition attempts for one asset, newest first.
    async fn list_transitions(
        &self,
        tenant: &TenantId,
        machine_id: &str,
        asset_ref: &AssetRef,
        limit: usize,
    ) -> StorageResult<Vec<TransitionRecord>>;
}

/// Fields a conditional override update may change. `None` leaves the field
/// untouched.
#[derive(Clone, Debug, Default)]
pub struct OverrideUpdate {
    pub status: Option<OverrideStatus>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Appended to the stored reason text (rejection audit trail).
    pub annotate_reason: Option<String>,
    pub evidence_pack_id: Option<String>,
    pub transition_record_id: Option<String>,
}

/// Storage interface for break-glass override records.
#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn insert_override(&self, record: OverrideRecord) -> StorageResult<()>;

    async fn get_override(&self, override_id: &str) -> StorageResult<Option<OverrideRecord>>;

    /// Overrides for a tenant, newest first, optionally filtered by status.
    async fn list_overrides(
        &self,
        tenant: &TenantId,
        status: Option<OverrideStatus>,
    ) -> StorageResult<Vec<OverrideRecord>>;

    /// Append an approval against a single consistent read of the approval
    /// set. Inside the atomic section: the record must be approvable
    /// (REQUESTED or PENDING_APPROVAL), the role must not have approved
    /// already, and if every required role is now present the status flips to
    /// APPROVED with `resolved_at` stamped, exactly once even under racing
    /// approvers.
    async fn apply_approval(
        &self,
        override_id: &str,
        approval: OverrideApproval,
    ) -> StorageResult<OverrideRecord>;

    /// Conditional update: applies `update` only while the current status is
    /// one of `expected`, otherwise reports the actual status as an
    /// invariant violation.
    async fn transition_override(
        &self,
        override_id: &str,
        expected: &[OverrideStatus],
        update: OverrideUpdate,
    ) -> StorageResult<OverrideRecord>;
}

/// Storage interface for sealed evidence packs.
#[async_trait]
pub trait PackStore: Send + Sync {
    async fn insert_pack(&self, record: PackRecord) -> StorageResult<()>;

    async fn get_pack(&self, pack_id: &str) -> StorageResult<Option<PackRecord>>;

    async fn get_pack_by_decision(
        &self,
        tenant: &TenantId,
        decision_id: &str,
    ) -> StorageResult<Option<PackRecord>>;
}

/// Unified storage bundle used when one adapter backs every engine.
pub trait TrustStorage:
    LedgerStore + PolicyStore + MachineStore + OverrideStore + PackStore + Send + Sync
{
}

impl<T> TrustStorage for T where
    T: LedgerStore + PolicyStore + MachineStore + OverrideStore + PackStore + Send + Sync
{
}
