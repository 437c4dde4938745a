//! Distribution manifests and their reproducibility hash.

mod manifest;

pub use manifest::normalize_for_hash;
pub use manifest::{
    read_manifest, reproducibility_hash, verify_manifest_hash, write_manifest,
    DistributionManifest, VerificationResult, VerifyError,
};
