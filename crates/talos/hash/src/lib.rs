//! Deterministic hashing primitives for the evidence chain.
//!
//! Everything the ledger seals goes through this crate: SHA-256 digests with
//! an algorithm prefix, canonical JSON (recursively sorted keys) so a storage
//! round-trip can never change a hash, the chain-hash construction, and
//! Merkle roots for checkpoints.

#![deny(unsafe_code)]

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use talos_types::TenantId;

/// Domain separator hashed into the first record of every tenant chain.
const GENESIS_SEED: &[u8] = b"TALOS_GENESIS_V1";

/// SHA-256 over raw bytes, rendered as `sha256:<hex>`.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("sha256:{}", hex::encode(digest))
}

/// The fixed `prev_hash` of the first record in a tenant's chain.
pub fn genesis_hash() -> String {
    sha256_hex(GENESIS_SEED)
}

/// Canonical JSON: object keys sorted recursively, arrays in order, no
/// insignificant whitespace. Used exclusively for hashing; storage keeps the
/// payload in whatever representation it likes.
pub fn canonical_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                if let Some(child) = map.get(key.as_str()) {
                    write_canonical(child, out)?;
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Hash a payload over its canonical form.
pub fn hash_payload(payload: &Value) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(payload)?.as_bytes()))
}

/// The metadata bound into a record's chain hash.
#[derive(Clone, Debug)]
pub struct ChainMetadata {
    pub tenant_id: TenantId,
    pub sequence_num: u64,
    pub created_at: DateTime<Utc>,
}

/// Timestamps are hashed in one fixed textual form (RFC 3339, milliseconds,
/// `Z` suffix) so a backend that re-renders `+00:00` as `Z` or trims
/// sub-millisecond digits cannot break verification.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `chain_hash = H(prev_hash | payload_hash | H(canonical(metadata)))`.
pub fn compute_chain_hash(
    prev_hash: &str,
    payload_hash: &str,
    metadata: &ChainMetadata,
) -> Result<String, serde_json::Error> {
    let normalized = serde_json::json!({
        "tenant_id": metadata.tenant_id.0,
        "sequence_num": metadata.sequence_num,
        "created_at": normalize_timestamp(metadata.created_at),
    });
    let metadata_hash = sha256_hex(canonical_json(&normalized)?.as_bytes());
    Ok(sha256_hex(
        format!("{prev_hash}|{payload_hash}|{metadata_hash}").as_bytes(),
    ))
}

/// Merkle root over a list of chain hashes: adjacent pairs are hashed level
/// by level; an odd element at the end of a level pairs with itself. A single
/// hash is its own root.
pub fn merkle_root(hashes: &[String]) -> String {
    if hashes.is_empty() {
        return sha256_hex(b"EMPTY");
    }
    if hashes.len() == 1 {
        return hashes[0].clone();
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(sha256_hex(format!("{}|{}", pair[0], right).as_bytes()));
        }
        level = next;
    }
    level.remove(0)
}
