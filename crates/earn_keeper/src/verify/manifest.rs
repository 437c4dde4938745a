//! Distribution manifest and SHA-256 reproducibility hash.

use crate::context::CycleContext;
use crate::distribute::{ClaimOperation, DistributionBatch};
use crate::merkle::MerkleTree;
use crate::tx::Pubkey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Inputs and outputs of one distribution cycle, enough to re-check it offline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionManifest {
    pub version: u32,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub program_id: Pubkey,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub mint: Pubkey,
    pub index: u64,
    pub index_timestamp: u64,
    /// Hex Merkle root over the mirrored earner set the claims were built from.
    pub earner_root: String,
    pub created_utc_rfc3339: String,
    pub ceiling: u64,
    pub simulated_total: u64,
    /// Sorted by user.
    pub claims: Vec<ClaimOperation>,
}

const MANIFEST_VERSION: u32 = 1;

impl DistributionManifest {
    pub fn new(ctx: &CycleContext, earners: &MerkleTree, batch: &DistributionBatch) -> Self {
        let created_utc_rfc3339 = time::OffsetDateTime::from_unix_timestamp(ctx.now)
            .ok()
            .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok())
            .unwrap_or_default();
        let mut claims = batch.operations.clone();
        claims.sort_by_key(|c| c.user);
        Self {
            version: MANIFEST_VERSION,
            program_id: ctx.addresses.program_id,
            mint: ctx.mint(),
            index: ctx.global.index,
            index_timestamp: ctx.global.timestamp,
            earner_root: hex::encode(earners.root()),
            created_utc_rfc3339,
            ceiling: batch.ceiling,
            simulated_total: batch.simulated_total,
            claims,
        }
    }

    pub fn claimed_total(&self) -> u128 {
        self.claims.iter().map(|c| u128::from(c.amount)).sum()
    }
}

/// Normalize JSON for hashing: sort keys and no whitespace.
pub fn normalize_for_hash(value: &serde_json::Value) -> Result<String, VerifyError> {
    let sorted = sort_json_keys(value);
    Ok(serde_json::to_string(&sorted)?)
}

fn sort_json_keys(v: &serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(m) => {
            let out: std::collections::BTreeMap<String, serde_json::Value> = m
                .iter()
                .map(|(k, v)| (k.clone(), sort_json_keys(v)))
                .collect();
            serde_json::Value::Object(serde_json::Map::from_iter(out))
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_json_keys).collect())
        }
        other => other.clone(),
    }
}

/// SHA-256 over the normalized manifest JSON.
pub fn reproducibility_hash(manifest: &DistributionManifest) -> Result<String, VerifyError> {
    let json = serde_json::to_value(manifest)?;
    let normalized = normalize_for_hash(&json)?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationResult {
    pub manifest_hash: String,
    pub expected_hash: Option<String>,
    pub matches: bool,
}

/// Compare against the content of a `.sha256` file.
pub fn verify_manifest_hash(
    manifest: &DistributionManifest,
    expected_hex: &str,
) -> Result<VerificationResult, VerifyError> {
    let manifest_hash = reproducibility_hash(manifest)?;
    let expected = expected_hex.trim().to_lowercase();
    let matches = manifest_hash == expected;
    Ok(VerificationResult {
        manifest_hash,
        expected_hash: Some(expected),
        matches,
    })
}

/// Write `path` and its `path.sha256` companion. Returns the hash.
pub fn write_manifest(manifest: &DistributionManifest, path: &Path) -> Result<String, VerifyError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let hash = reproducibility_hash(manifest)?;
    std::fs::write(path, serde_json::to_string_pretty(manifest)?)?;
    std::fs::write(hash_path(path), format!("{hash}\n"))?;
    Ok(hash)
}

pub fn read_manifest(path: &Path) -> Result<DistributionManifest, VerifyError> {
    let s = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&s)?)
}

fn hash_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    name.into()
}
