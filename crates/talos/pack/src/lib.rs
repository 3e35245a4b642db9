//! Evidence-pack builder.
//!
//! A pack is a sealed, versioned manifest tying one decision to its policy
//! evaluation, state transition, attestations and ledger anchors. The seal is
//! the canonical-JSON hash of the manifest; verification re-derives it and
//! reports per-check results as data.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use talos_storage::{PackStore, StorageError};
use talos_types::pack::{
    ContextRef, IntegrityRefs, ModelRuntimeRef, PackAttestation, PackChecks, PackDecision,
    PackManifest, PackPolicyRef, PackRecord, PackStateTransition, Privacy, Retention,
    VerifyPackResult, PACK_VERSION,
};
use talos_types::TenantId;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub type PackResult<T> = Result<T, PackError>;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("evidence pack not found: {0}")]
    NotFound(String),

    #[error("invalid pack input: {0}")]
    InvalidInput(String),

    #[error("manifest serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything a caller supplies to seal one pack.
#[derive(Clone, Debug)]
pub struct BuildPack {
    pub decision: PackDecision,
    pub context_refs: Vec<ContextRef>,
    pub policy: PackPolicyRef,
    pub model_runtime: Option<ModelRuntimeRef>,
    pub state_transition: PackStateTransition,
    pub attestations: Vec<PackAttestation>,
    pub integrity: IntegrityRefs,
    pub retention: Retention,
    pub privacy: Privacy,
    /// Ledger record ids the pack bundles, carried on the stored row.
    pub evidence_ids: Vec<String>,
}

/// The contract override governance consumes: sealing is injected so the
/// governance engine never depends on how packs are assembled or stored.
#[async_trait]
pub trait PackAssembler: Send + Sync {
    async fn build_pack(&self, input: BuildPack) -> PackResult<PackRecord>;
}

pub struct EvidencePackBuilder {
    store: Arc<dyn PackStore>,
}

impl EvidencePackBuilder {
    pub fn new(store: Arc<dyn PackStore>) -> Self {
        Self { store }
    }

    pub async fn get_pack(&self, pack_id: &str) -> PackResult<PackRecord> {
        self.store
            .get_pack(pack_id)
            .await?
            .ok_or_else(|| PackError::NotFound(pack_id.to_string()))
    }

    pub async fn get_pack_by_decision(
        &self,
        tenant: &TenantId,
        decision_id: &str,
    ) -> PackResult<Option<PackRecord>> {
        Ok(self.store.get_pack_by_decision(tenant, decision_id).await?)
    }
}

#[async_trait]
impl PackAssembler for EvidencePackBuilder {
    async fn build_pack(&self, input: BuildPack) -> PackResult<PackRecord> {
        if input.decision.decision_id.is_empty() {
            return Err(PackError::InvalidInput("decision_id is required".into()));
        }
        let manifest = PackManifest {
            pack_version: PACK_VERSION.to_string(),
            decision: input.decision,
            context_refs: input.context_refs,
            policy: input.policy,
            model_runtime: input.model_runtime,
            state_transition: input.state_transition,
            attestations: input.attestations,
            integrity: input.integrity,
            retention: input.retention,
            privacy: input.privacy,
        };
        let pack_hash = hash_manifest(&manifest)?;
        let record = PackRecord {
            pack_id: Uuid::new_v4().to_string(),
            tenant_id: manifest.decision.tenant_id.clone(),
            decision_id: manifest.decision.decision_id.clone(),
            pack_version: manifest.pack_version.clone(),
            manifest,
            pack_hash,
            evidence_ids: input.evidence_ids,
            created_at: Utc::now(),
        };
        self.store.insert_pack(record.clone()).await?;
        info!(
            pack_id = %record.pack_id,
            decision_id = %record.decision_id,
            tenant = %record.tenant_id,
            "evidence pack sealed"
        );
        Ok(record)
    }
}

/// The seal hash: canonical JSON of the whole manifest.
pub fn hash_manifest(manifest: &PackManifest) -> Result<String, serde_json::Error> {
    talos_hash::hash_payload(&serde_json::to_value(manifest)?)
}

/// Re-derive the seal and run the structural checks. Content failures are
/// data; only serialization faults are errors.
pub fn verify_pack(
    manifest: &PackManifest,
    expected_hash: &str,
) -> Result<VerifyPackResult, serde_json::Error> {
    let checks = PackChecks {
        hash_match: hash_manifest(manifest)? == expected_hash,
        version_valid: manifest.pack_version == PACK_VERSION,
        context_refs_present: !manifest.context_refs.is_empty(),
        attestations_present: !manifest.attestations.is_empty(),
    };
    let mut failed = Vec::new();
    if !checks.hash_match {
        failed.push("hash mismatch");
    }
    if !checks.version_valid {
        failed.push("unsupported pack version");
    }
    if !checks.context_refs_present {
        failed.push("no context refs");
    }
    if !checks.attestations_present {
        failed.push("no attestations");
    }
    Ok(VerifyPackResult {
        valid: failed.is_empty(),
        error: (!failed.is_empty()).then(|| failed.join("; ")),
        checks,
    })
}
