//! Evidence ledger engine.
//!
//! Tenant-scoped append-only chains of evidence records. The store assigns
//! sequence numbers and computes the hash linkage inside its atomic append;
//! this crate layers validation, full-chain verification and Merkle
//! checkpointing on top.

#![deny(unsafe_code)]

mod error;

pub use error::{LedgerError, LedgerResult};

use chrono::Utc;
use std::sync::Arc;
use talos_hash::ChainMetadata;
use talos_storage::LedgerStore;
use talos_types::ledger::{AppendEvidence, ChainHead, Checkpoint, EvidenceRecord, VerifyResult};
use talos_types::TenantId;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The append/verify/checkpoint surface over one [`LedgerStore`].
pub struct EvidenceLedger {
    store: Arc<dyn LedgerStore>,
}

impl EvidenceLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Append one record to the tenant's chain.
    pub async fn append(&self, input: AppendEvidence) -> LedgerResult<EvidenceRecord> {
        if input.tenant_id.0.is_empty() {
            return Err(LedgerError::InvalidInput("tenant_id is required".into()));
        }
        if input.payload.is_null() {
            return Err(LedgerError::InvalidInput("payload is required".into()));
        }
        let record = self.store.append_evidence(input).await?;
        debug!(
            tenant = %record.tenant_id,
            evidence_id = %record.evidence_id,
            sequence_num = record.sequence_num,
            "evidence appended"
        );
        Ok(record)
    }

    pub async fn get_evidence(&self, evidence_id: &str) -> LedgerResult<EvidenceRecord> {
        self.store
            .get_evidence(evidence_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(evidence_id.to_string()))
    }

    /// The current head of a tenant's chain, or `None` for an empty chain.
    pub async fn chain_head(&self, tenant: &TenantId) -> LedgerResult<Option<ChainHead>> {
        Ok(self
            .store
            .chain_head(tenant)
            .await?
            .as_ref()
            .map(ChainHead::from))
    }

    /// All records for a tenant starting at `from_sequence`, ascending.
    pub async fn list_evidence(
        &self,
        tenant: &TenantId,
        from_sequence: u64,
    ) -> LedgerResult<Vec<EvidenceRecord>> {
        Ok(self.store.list_evidence(tenant, from_sequence).await?)
    }

    /// Walk the whole chain and re-derive every hash.
    ///
    /// Integrity failure is a finding, not a fault: the result carries the
    /// first failing sequence number and what broke there. Per record the
    /// checks run in linkage order: prev-hash continuity, then payload hash,
    /// then chain hash.
    pub async fn verify_chain(&self, tenant: &TenantId) -> LedgerResult<VerifyResult> {
        let records = self.store.list_evidence(tenant, 1).await?;
        let mut expected_prev = talos_hash::genesis_hash();
        let mut expected_seq: u64 = 1;
        let mut checked: u64 = 0;

        for record in &records {
            checked += 1;
            if record.sequence_num != expected_seq {
                warn!(tenant = %tenant, sequence_num = record.sequence_num, "sequence gap");
                return Ok(VerifyResult::invalid(
                    checked,
                    record.sequence_num,
                    format!(
                        "sequence gap: expected {expected_seq}, found {}",
                        record.sequence_num
                    ),
                ));
            }
            if record.prev_hash != expected_prev {
                warn!(tenant = %tenant, sequence_num = record.sequence_num, "broken prev_hash link");
                return Ok(VerifyResult::invalid(
                    checked,
                    record.sequence_num,
                    "prev_hash does not match prior record's chain_hash",
                ));
            }
            let payload_hash = talos_hash::hash_payload(&record.payload)?;
            if payload_hash != record.payload_hash {
                warn!(tenant = %tenant, sequence_num = record.sequence_num, "payload hash mismatch");
                return Ok(VerifyResult::invalid(
                    checked,
                    record.sequence_num,
                    "payload_hash does not match payload content",
                ));
            }
            let chain_hash = talos_hash::compute_chain_hash(
                &record.prev_hash,
                &record.payload_hash,
                &ChainMetadata {
                    tenant_id: record.tenant_id.clone(),
                    sequence_num: record.sequence_num,
                    created_at: record.created_at,
                },
            )?;
            if chain_hash != record.chain_hash {
                warn!(tenant = %tenant, sequence_num = record.sequence_num, "chain hash mismatch");
                return Ok(VerifyResult::invalid(
                    checked,
                    record.sequence_num,
                    "chain_hash does not match recomputed value",
                ));
            }
            expected_prev = record.chain_hash.clone();
            expected_seq += 1;
        }
        Ok(VerifyResult::ok(checked))
    }

    /// Seal every record appended since the previous checkpoint into a new
    /// Merkle checkpoint. Consecutive checkpoints cover adjacent,
    /// non-overlapping ranges.
    pub async fn create_checkpoint(&self, tenant: &TenantId) -> LedgerResult<Checkpoint> {
        let sequence_from = match self.store.latest_checkpoint(tenant).await? {
            Some(prior) => prior.sequence_to + 1,
            None => 1,
        };
        let records = self.store.list_evidence(tenant, sequence_from).await?;
        if records.is_empty() {
            return Err(LedgerError::NothingToCheckpoint(tenant.to_string()));
        }

        let hashes: Vec<String> = records.iter().map(|r| r.chain_hash.clone()).collect();
        let last = &records[records.len() - 1];
        let checkpoint = Checkpoint {
            checkpoint_id: Uuid::new_v4().to_string(),
            tenant_id: tenant.clone(),
            sequence_from,
            sequence_to: last.sequence_num,
            merkle_root: talos_hash::merkle_root(&hashes),
            head_hash: last.chain_hash.clone(),
            record_count: records.len() as u64,
            created_at: Utc::now(),
        };
        self.store.insert_checkpoint(checkpoint.clone()).await?;
        info!(
            tenant = %tenant,
            checkpoint_id = %checkpoint.checkpoint_id,
            sequence_from = checkpoint.sequence_from,
            sequence_to = checkpoint.sequence_to,
            "checkpoint sealed"
        );
        Ok(checkpoint)
    }

    /// The most recent checkpoint, if any.
    pub async fn latest_checkpoint(&self, tenant: &TenantId) -> LedgerResult<Option<Checkpoint>> {
        Ok(self.store.latest_checkpoint(tenant).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use talos_storage::memory::InMemoryTrustStorage;
    use talos_storage::StorageResult;

    fn ledger() -> EvidenceLedger {
        EvidenceLedger::new(Arc::new(InMemoryTrustStorage::new()))
    }

    fn append(tenant: &str, payload: serde_json::Value) -> AppendEvidence {
        AppendEvidence {
            tenant_id: TenantId::new(tenant),
            payload,
            created_by: Some("test".into()),
            ..Default::default()
        }
    }

    /// Delegates to a real store but applies a mutation to one record on the
    /// way out of `list_evidence`, simulating at-rest tampering.
    struct TamperingStore {
        inner: InMemoryTrustStorage,
        #[allow(clippy::type_complexity)]
        tamper: Mutex<Option<Box<dyn Fn(&mut EvidenceRecord) + Send>>>,
        target_seq: u64,
    }

    impl TamperingStore {
        fn new(target_seq: u64, tamper: impl Fn(&mut EvidenceRecord) + Send + 'static) -> Self {
            Self {
                inner: InMemoryTrustStorage::new(),
                tamper: Mutex::new(Some(Box::new(tamper))),
                target_seq,
            }
        }
    }

    #[async_trait]
    impl LedgerStore for TamperingStore {
        async fn append_evidence(&self, input: AppendEvidence) -> StorageResult<EvidenceRecord> {
            self.inner.append_evidence(input).await
        }

        async fn get_evidence(&self, evidence_id: &str) -> StorageResult<Option<EvidenceRecord>> {
            self.inner.get_evidence(evidence_id).await
        }

        async fn chain_head(&self, tenant: &TenantId) -> StorageResult<Option<EvidenceRecord>> {
            self.inner.chain_head(tenant).await
        }

        async fn list_evidence(
            &self,
            tenant: &TenantId,
            from_sequence: u64,
        ) -> StorageResult<Vec<EvidenceRecord>> {
            let mut records = self.inner.list_evidence(tenant, from_sequence).await?;
            if let Some(tamper) = self.tamper.lock().unwrap().as_ref() {
                if let Some(record) = records.iter_mut().find(|r| r.sequence_num == self.target_seq)
                {
                    tamper(record);
                }
            }
            Ok(records)
        }

        async fn latest_checkpoint(
            &self,
            tenant: &TenantId,
        ) -> StorageResult<Option<talos_types::ledger::Checkpoint>> {
            self.inner.latest_checkpoint(tenant).await
        }

        async fn insert_checkpoint(
            &self,
            checkpoint: talos_types::ledger::Checkpoint,
        ) -> StorageResult<()> {
            self.inner.insert_checkpoint(checkpoint).await
        }
    }

    #[tokio::test]
    async fn append_then_verify_is_valid() {
        let ledger = ledger();
        let tenant = TenantId::new("t1");
        for i in 0..5 {
            ledger.append(append("t1", json!({"i": i}))).await.unwrap();
        }

        let result = ledger.verify_chain(&tenant).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.records_checked, 5);
        assert_eq!(result.first_invalid_at, None);
    }

    #[tokio::test]
    async fn empty_chain_verifies_vacuously() {
        let ledger = ledger();
        let result = ledger.verify_chain(&TenantId::new("nobody")).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.records_checked, 0);
    }

    #[tokio::test]
    async fn append_rejects_missing_tenant() {
        let ledger = ledger();
        let err = ledger
            .append(AppendEvidence {
                payload: json!({"x": 1}),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn tampered_payload_is_detected_at_its_sequence() {
        let store = Arc::new(TamperingStore::new(2, |record| {
            record.payload = json!({"event": "forged"});
        }));
        let ledger = EvidenceLedger::new(store);
        let tenant = TenantId::new("t1");
        for i in 0..3 {
            ledger.append(append("t1", json!({"i": i}))).await.unwrap();
        }

        let result = ledger.verify_chain(&tenant).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.first_invalid_at, Some(2));
        assert!(result.error.unwrap().contains("payload_hash"));
    }

    #[tokio::test]
    async fn broken_link_is_detected() {
        let store = Arc::new(TamperingStore::new(3, |record| {
            record.prev_hash = talos_hash::sha256_hex(b"severed");
        }));
        let ledger = EvidenceLedger::new(store);
        let tenant = TenantId::new("t1");
        for i in 0..4 {
            ledger.append(append("t1", json!({"i": i}))).await.unwrap();
        }

        let result = ledger.verify_chain(&tenant).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.first_invalid_at, Some(3));
        assert!(result.error.unwrap().contains("prev_hash"));
    }

    #[tokio::test]
    async fn rewritten_chain_hash_is_detected() {
        let store = Arc::new(TamperingStore::new(1, |record| {
            // Consistent payload but a chain hash that no longer derives
            // from the record's metadata.
            record.chain_hash = talos_hash::sha256_hex(b"rewritten");
        }));
        let ledger = EvidenceLedger::new(store);
        let tenant = TenantId::new("t1");
        ledger.append(append("t1", json!({"i": 0}))).await.unwrap();

        let result = ledger.verify_chain(&tenant).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.first_invalid_at, Some(1));
        assert!(result.error.unwrap().contains("chain_hash"));
    }

    #[tokio::test]
    async fn checkpoints_cover_adjacent_ranges() {
        let ledger = ledger();
        let tenant = TenantId::new("t1");
        for i in 0..3 {
            ledger.append(append("t1", json!({"i": i}))).await.unwrap();
        }
        let first = ledger.create_checkpoint(&tenant).await.unwrap();
        assert_eq!((first.sequence_from, first.sequence_to), (1, 3));
        assert_eq!(first.record_count, 3);

        for i in 3..5 {
            ledger.append(append("t1", json!({"i": i}))).await.unwrap();
        }
        let second = ledger.create_checkpoint(&tenant).await.unwrap();
        assert_eq!((second.sequence_from, second.sequence_to), (4, 5));

        let head = ledger.chain_head(&tenant).await.unwrap().unwrap();
        assert_eq!(second.head_hash, head.chain_hash);
    }

    #[tokio::test]
    async fn checkpoint_without_new_records_is_an_error() {
        let ledger = ledger();
        let tenant = TenantId::new("t1");
        ledger.append(append("t1", json!({"i": 0}))).await.unwrap();
        ledger.create_checkpoint(&tenant).await.unwrap();

        let err = ledger.create_checkpoint(&tenant).await.unwrap_err();
        assert!(matches!(err, LedgerError::NothingToCheckpoint(_)));
    }

    #[tokio::test]
    async fn checkpoint_merkle_root_matches_recomputation() {
        let ledger = ledger();
        let tenant = TenantId::new("t1");
        for i in 0..4 {
            ledger.append(append("t1", json!({"i": i}))).await.unwrap();
        }
        let checkpoint = ledger.create_checkpoint(&tenant).await.unwrap();

        let hashes: Vec<String> = ledger
            .list_evidence(&tenant, 1)
            .await
            .unwrap()
            .iter()
            .map(|r| r.chain_hash.clone())
            .collect();
        assert_eq!(checkpoint.merkle_root, talos_hash::merkle_root(&hashes));
    }
}
