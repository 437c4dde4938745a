//! Accrual index tracking and the cross-chain index push.

mod monitor;

use serde::{Deserialize, Serialize};

pub use monitor::{
    is_stale, IndexMonitor, MonitorConfig, MonitorReport, MonitorState, PushOperation, PushParams,
    Staleness,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexChain {
    Evm,
    Solana,
}

/// Index value as seen on one chain. Values never decrease on either chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualIndex {
    pub value: u64,
    /// Unix seconds of the last update, when the chain records one.
    pub last_update: i64,
    pub chain: IndexChain,
}

impl AccrualIndex {
    pub fn delta_since(&self, earlier: u64) -> u64 {
        self.value.saturating_sub(earlier)
    }
}
