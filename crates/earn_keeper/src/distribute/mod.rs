//! Yield distribution: claim amounts, simulation-bounded batches, submission.

mod ceiling;
mod engine;

pub use ceiling::{CeilingPolicy, SECONDS_PER_YEAR};
pub use engine::{check_ceiling, ClaimEngine, ClaimOperation, ClaimsConfig, DistributionBatch};
