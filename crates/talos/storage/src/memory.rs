//! In-memory reference adapter.
//!
//! Backs every port with `std::sync::RwLock`-guarded maps. The atomic
//! sections the traits promise (sequence assignment, token CAS, approval
//! append) are realized by holding the family's write lock across the whole
//! read-check-write.

use crate::model::MachineRecord;
use crate::traits::{
    LedgerStore, MachineStore, OverrideStore, OverrideUpdate, PackStore, PolicyStore,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use talos_hash::ChainMetadata;
use talos_types::gate::{AssetState, GateToken, TokenStatus, TransitionRecord};
use talos_types::governance::{OverrideApproval, OverrideRecord, OverrideStatus};
use talos_types::ledger::{AppendEvidence, Checkpoint, EvidenceRecord};
use talos_types::pack::PackRecord;
use talos_types::policy::{PolicyDefinition, PolicyVersionRecord};
use talos_types::{AssetRef, TenantId};
use uuid::Uuid;

type AssetKey = (TenantId, String, String, String);

/// In-memory implementation of every Talos storage port.
#[derive(Default)]
pub struct InMemoryTrustStorage {
    evidence: RwLock<HashMap<TenantId, Vec<EvidenceRecord>>>,
    checkpoints: RwLock<HashMap<TenantId, Vec<Checkpoint>>>,
    policies: RwLock<Vec<PolicyVersionRecord>>,
    machines: RwLock<Vec<MachineRecord>>,
    tokens: RwLock<HashMap<String, GateToken>>,
    asset_states: RwLock<HashMap<AssetKey, AssetState>>,
    transitions: RwLock<Vec<TransitionRecord>>,
    overrides: RwLock<HashMap<String, OverrideRecord>>,
    packs: RwLock<HashMap<String, PackRecord>>,
}

impl InMemoryTrustStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(family: &str) -> StorageError {
    StorageError::Backend(format!("{family} lock poisoned"))
}

fn asset_key(tenant: &TenantId, machine_id: &str, asset_ref: &AssetRef) -> AssetKey {
    (
        tenant.clone(),
        machine_id.to_string(),
        asset_ref.asset_type.clone(),
        asset_ref.id.clone(),
    )
}

#[async_trait]
impl LedgerStore for InMemoryTrustStorage {
    async fn append_evidence(&self, input: AppendEvidence) -> StorageResult<EvidenceRecord> {
        // The write lock spans head read, hash computation and insert, which
        // serializes appends per process and keeps the chain gapless.
        let mut evidence = self.evidence.write().map_err(|_| poisoned("evidence"))?;
        let chain = evidence.entry(input.tenant_id.clone()).or_default();

        let (sequence_num, prev_hash) = match chain.last() {
            Some(head) => (head.sequence_num + 1, head.chain_hash.clone()),
            None => (1, talos_hash::genesis_hash()),
        };
        let created_at = Utc::now();
        let payload_hash = talos_hash::hash_payload(&input.payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let chain_hash = talos_hash::compute_chain_hash(
            &prev_hash,
            &payload_hash,
            &ChainMetadata {
                tenant_id: input.tenant_id.clone(),
                sequence_num,
                created_at,
            },
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let record = EvidenceRecord {
            evidence_id: Uuid::new_v4().to_string(),
            tenant_id: input.tenant_id,
            sequence_num,
            prev_hash,
            payload: input.payload,
            payload_hash,
            chain_hash,
            decision_id: input.decision_id,
            policy_version_id: input.policy_version_id,
            state_transition_id: input.state_transition_id,
            attestation_refs: input.attestation_refs,
            created_by: input.created_by,
            created_at,
        };
        chain.push(record.clone());
        Ok(record)
    }

    async fn get_evidence(&self, evidence_id: &str) -> StorageResult<Option<EvidenceRecord>> {
        let evidence = self.evidence.read().map_err(|_| poisoned("evidence"))?;
        Ok(evidence
            .values()
            .flatten()
            .find(|r| r.evidence_id == evidence_id)
            .cloned())
    }

    async fn chain_head(&self, tenant: &TenantId) -> StorageResult<Option<EvidenceRecord>> {
        let evidence = self.evidence.read().map_err(|_| poisoned("evidence"))?;
        Ok(evidence.get(tenant).and_then(|chain| chain.last().cloned()))
    }

    async fn list_evidence(
        &self,
        tenant: &TenantId,
        from_sequence: u64,
    ) -> StorageResult<Vec<EvidenceRecord>> {
        let evidence = self.evidence.read().map_err(|_| poisoned("evidence"))?;
        Ok(evidence
            .get(tenant)
            .map(|chain| {
                chain
                    .iter()
                    .filter(|r| r.sequence_num >= from_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_checkpoint(&self, tenant: &TenantId) -> StorageResult<Option<Checkpoint>> {
        let checkpoints = self
            .checkpoints
            .read()
            .map_err(|_| poisoned("checkpoints"))?;
        Ok(checkpoints
            .get(tenant)
            .and_then(|list| list.iter().max_by_key(|c| c.sequence_to).cloned()))
    }

    async fn insert_checkpoint(&self, checkpoint: Checkpoint) -> StorageResult<()> {
        let mut checkpoints = self
            .checkpoints
            .write()
            .map_err(|_| poisoned("checkpoints"))?;
        checkpoints
            .entry(checkpoint.tenant_id.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for InMemoryTrustStorage {
    async fn publish_version(
        &self,
        definition: PolicyDefinition,
        published_by: &str,
    ) -> StorageResult<PolicyVersionRecord> {
        let mut policies = self.policies.write().map_err(|_| poisoned("policies"))?;
        if policies
            .iter()
            .any(|p| p.policy_id == definition.policy_id && p.version == definition.version)
        {
            return Err(StorageError::Conflict(format!(
                "policy {} version {} already published",
                definition.policy_id, definition.version
            )));
        }
        // Deactivate-then-insert under one lock so there is never zero or
        // two active versions observable for a policy id.
        for existing in policies
            .iter_mut()
            .filter(|p| p.policy_id == definition.policy_id)
        {
            existing.is_active = false;
        }
        let record = PolicyVersionRecord {
            policy_version_id: Uuid::new_v4().to_string(),
            policy_id: definition.policy_id.clone(),
            version: definition.version.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            definition,
            is_active: true,
            published_at: Utc::now(),
            published_by: published_by.to_string(),
        };
        policies.push(record.clone());
        Ok(record)
    }

    async fn get_active(&self, policy_id: &str) -> StorageResult<Option<PolicyVersionRecord>> {
        let policies = self.policies.read().map_err(|_| poisoned("policies"))?;
        Ok(policies
            .iter()
            .find(|p| p.policy_id == policy_id && p.is_active)
            .cloned())
    }

    async fn get_version(
        &self,
        policy_id: &str,
        version: &str,
    ) -> StorageResult<Option<PolicyVersionRecord>> {
        let policies = self.policies.read().map_err(|_| poisoned("policies"))?;
        Ok(policies
            .iter()
            .find(|p| p.policy_id == policy_id && p.version == version)
            .cloned())
    }
}

#[async_trait]
impl MachineStore for InMemoryTrustStorage {
    async fn upsert_machine(&self, record: MachineRecord) -> StorageResult<()> {
        let mut machines = self.machines.write().map_err(|_| poisoned("machines"))?;
        machines.retain(|m| !(m.machine_id == record.machine_id && m.version == record.version));
        machines.push(record);
        Ok(())
    }

    async fn get_machine(
        &self,
        machine_id: &str,
        version: Option<&str>,
    ) -> StorageResult<Option<MachineRecord>> {
        let machines = self.machines.read().map_err(|_| poisoned("machines"))?;
        Ok(match version {
            Some(version) => machines
                .iter()
                .find(|m| m.machine_id == machine_id && m.version == version)
                .cloned(),
            None => machines
                .iter()
                .filter(|m| m.machine_id == machine_id)
                .max_by_key(|m| m.created_at)
                .cloned(),
        })
    }

    async fn insert_token(&self, token: GateToken) -> StorageResult<()> {
        let mut tokens = self.tokens.write().map_err(|_| poisoned("tokens"))?;
        tokens.insert(token.token_id.clone(), token);
        Ok(())
    }

    async fn get_token(&self, token_id: &str) -> StorageResult<Option<GateToken>> {
        let tokens = self.tokens.read().map_err(|_| poisoned("tokens"))?;
        Ok(tokens.get(token_id).cloned())
    }

    async fn update_token_status(
        &self,
        token_id: &str,
        expected: TokenStatus,
        to: TokenStatus,
    ) -> StorageResult<GateToken> {
        let mut tokens = self.tokens.write().map_err(|_| poisoned("tokens"))?;
        let token = tokens
            .get_mut(token_id)
            .ok_or_else(|| StorageError::NotFound(format!("gate token {token_id}")))?;
        if token.status != expected {
            return Err(StorageError::Conflict(format!(
                "gate token {token_id} status is {:?}, expected {:?}",
                token.status, expected
            )));
        }
        token.status = to;
        Ok(token.clone())
    }

    async fn upsert_asset_state(&self, state: AssetState) -> StorageResult<()> {
        let mut states = self
            .asset_states
            .write()
            .map_err(|_| poisoned("asset states"))?;
        let key = asset_key(&state.tenant_id, &state.machine_id, &state.asset_ref);
        states.insert(key, state);
        Ok(())
    }

    async fn get_asset_state(
        &self,
        tenant: &TenantId,
        machine_id: &str,
        asset_ref: &AssetRef,
    ) -> StorageResult<Option<AssetState>> {
        let states = self
            .asset_states
            .read()
            .map_err(|_| poisoned("asset states"))?;
        Ok(states.get(&asset_key(tenant, machine_id, asset_ref)).cloned())
    }

    async fn insert_transition(&self, record: TransitionRecord) -> StorageResult<()> {
        let mut transitions = self
            .transitions
            .write()
            .map_err(|_| poisoned("transitions"))?;
        transitions.push(record);
        Ok(())
    }

    async fn list_transitions(
        &self,
        tenant: &TenantId,
        machine_id: &str,
        asset_ref: &AssetRef,
        limit: usize,
    ) -> StorageResult<Vec<TransitionRecord>> {
        let transitions = self
            .transitions
            .read()
            .map_err(|_| poisoned("transitions"))?;
        let mut matching: Vec<TransitionRecord> = transitions
            .iter()
            .filter(|t| {
                t.tenant_id == *tenant && t.machine_id == machine_id && t.asset_ref == *asset_ref
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

#[async_trait]
impl OverrideStore for InMemoryTrustStorage {
    async fn insert_override(&self, record: OverrideRecord) -> StorageResult<()> {
        let mut overrides = self.overrides.write().map_err(|_| poisoned("overrides"))?;
        overrides.insert(record.override_id.clone(), record);
        Ok(())
    }

    async fn get_override(&self, override_id: &str) -> StorageResult<Option<OverrideRecord>> {
        let overrides = self.overrides.read().map_err(|_| poisoned("overrides"))?;
        Ok(overrides.get(override_id).cloned())
    }

    async fn list_overrides(
        &self,
        tenant: &TenantId,
        status: Option<OverrideStatus>,
    ) -> StorageResult<Vec<OverrideRecord>> {
        let overrides = self.overrides.read().map_err(|_| poisoned("overrides"))?;
        let mut matching: Vec<OverrideRecord> = overrides
            .values()
            .filter(|o| o.tenant_id == *tenant && status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(matching)
    }

    async fn apply_approval(
        &self,
        override_id: &str,
        approval: OverrideApproval,
    ) -> StorageResult<OverrideRecord> {
        let mut overrides = self.overrides.write().map_err(|_| poisoned("overrides"))?;
        let record = overrides
            .get_mut(override_id)
            .ok_or_else(|| StorageError::NotFound(format!("override {override_id}")))?;
        if !matches!(
            record.status,
            OverrideStatus::Requested | OverrideStatus::PendingApproval
        ) {
            return Err(StorageError::InvariantViolation(format!(
                "override {override_id} is {} and cannot accept approvals",
                record.status
            )));
        }
        if record.approvals.iter().any(|a| a.role == approval.role) {
            return Err(StorageError::Conflict(format!(
                "role {} has already approved override {override_id}",
                approval.role
            )));
        }
        record.approvals.push(approval);
        let complete = record
            .required_approvals
            .iter()
            .all(|role| record.approvals.iter().any(|a| &a.role == role));
        if complete {
            record.status = OverrideStatus::Approved;
            record.resolved_at = Some(Utc::now());
        } else {
            record.status = OverrideStatus::PendingApproval;
        }
        Ok(record.clone())
    }

    async fn transition_override(
        &self,
        override_id: &str,
        expected: &[OverrideStatus],
        update: OverrideUpdate,
    ) -> StorageResult<OverrideRecord> {
        let mut overrides = self.overrides.write().map_err(|_| poisoned("overrides"))?;
        let record = overrides
            .get_mut(override_id)
            .ok_or_else(|| StorageError::NotFound(format!("override {override_id}")))?;
        if !expected.contains(&record.status) {
            return Err(StorageError::InvariantViolation(format!(
                "override {override_id} is {}, expected one of {:?}",
                record.status, expected
            )));
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(resolved_at) = update.resolved_at {
            record.resolved_at = Some(resolved_at);
        }
        if let Some(annotation) = update.annotate_reason {
            record.reason_text.push_str(&annotation);
        }
        if let Some(pack_id) = update.evidence_pack_id {
            record.evidence_pack_id = Some(pack_id);
        }
        if let Some(transition_record_id) = update.transition_record_id {
            record.transition_record_id = Some(transition_record_id);
        }
        Ok(record.clone())
    }
}

#[async_trait]
impl PackStore for InMemoryTrustStorage {
    async fn insert_pack(&self, record: PackRecord) -> StorageResult<()> {
        let mut packs = self.packs.write().map_err(|_| poisoned("packs"))?;
        packs.insert(record.pack_id.clone(), record);
        Ok(())
    }

    async fn get_pack(&self, pack_id: &str) -> StorageResult<Option<PackRecord>> {
        let packs = self.packs.read().map_err(|_| poisoned("packs"))?;
        Ok(packs.get(pack_id).cloned())
    }

    async fn get_pack_by_decision(
        &self,
        tenant: &TenantId,
        decision_id: &str,
    ) -> StorageResult<Option<PackRecord>> {
        let packs = self.packs.read().map_err(|_| poisoned("packs"))?;
        Ok(packs
            .values()
            .find(|p| p.tenant_id == *tenant && p.decision_id == decision_id)
            .cloned())
    }
}
