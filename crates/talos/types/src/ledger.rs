//! Evidence ledger record shapes.

use crate::common::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One immutable fact in the audit trail. Appended once, never mutated.
///
/// `chain_hash` is a pure function of the record's own content plus the
/// previous record's `chain_hash` (or the genesis hash for the first record
/// of a tenant). All other integrity guarantees build on this linkage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub evidence_id: String,
    pub tenant_id: TenantId,
    pub sequence_num: u64,
    pub prev_hash: String,
    pub payload: Value,
    pub payload_hash: String,
    pub chain_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_transition_id: Option<String>,
    #[serde(default)]
    pub attestation_refs: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append request. Links to decisions, policy versions and transitions are
/// optional cross-references, opaque to the ledger itself.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppendEvidence {
    pub tenant_id: TenantId,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_transition_id: Option<String>,
    #[serde(default)]
    pub attestation_refs: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// Compact summary of the most recent record of a tenant's chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainHead {
    pub tenant_id: TenantId,
    pub evidence_id: String,
    pub sequence_num: u64,
    pub chain_hash: String,
    pub created_at: DateTime<Utc>,
}

impl From<&EvidenceRecord> for ChainHead {
    fn from(record: &EvidenceRecord) -> Self {
        Self {
            tenant_id: record.tenant_id.clone(),
            evidence_id: record.evidence_id.clone(),
            sequence_num: record.sequence_num,
            chain_hash: record.chain_hash.clone(),
            created_at: record.created_at,
        }
    }
}

/// Outcome of a full chain scan. Integrity failure is a reportable business
/// outcome, so this is returned as data rather than an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub valid: bool,
    pub records_checked: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_invalid_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResult {
    pub fn ok(records_checked: u64) -> Self {
        Self {
            valid: true,
            records_checked,
            first_invalid_at: None,
            error: None,
        }
    }

    pub fn invalid(records_checked: u64, sequence_num: u64, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            records_checked,
            first_invalid_at: Some(sequence_num),
            error: Some(error.into()),
        }
    }
}

/// A sealed Merkle summary of a contiguous record range. Consecutive
/// checkpoints never overlap: each starts at its predecessor's
/// `sequence_to + 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub tenant_id: TenantId,
    pub sequence_from: u64,
    pub sequence_to: u64,
    pub merkle_root: String,
    pub head_hash: String,
    pub record_count: u64,
    pub created_at: DateTime<Utc>,
}
