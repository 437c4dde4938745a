//! Aggregate distribution ceilings, computed without looking at the claims they bound.

use crate::registry::GlobalState;
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_YEAR: u128 = 365 * 24 * 60 * 60;
const BPS: u128 = 10_000;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CeilingPolicy {
    /// Operator-supplied bound.
    Fixed { amount: u64 },
    /// Whatever the program still allows this cycle: `max_yield - distributed`.
    #[default]
    RemainingCycleYield,
    /// Yield a supply earns at `rate_bps` over `elapsed_secs`.
    EarnerRate {
        rate_bps: u32,
        supply: u64,
        elapsed_secs: u64,
    },
}

impl CeilingPolicy {
    pub fn ceiling(&self, global: &GlobalState) -> u64 {
        match self {
            Self::Fixed { amount } => *amount,
            Self::RemainingCycleYield => global.remaining_yield(),
            Self::EarnerRate {
                rate_bps,
                supply,
                elapsed_secs,
            } => {
                let v = u128::from(*supply) * u128::from(*rate_bps) * u128::from(*elapsed_secs)
                    / (BPS * SECONDS_PER_YEAR);
                u64::try_from(v).unwrap_or(u64::MAX)
            }
        }
    }
}
