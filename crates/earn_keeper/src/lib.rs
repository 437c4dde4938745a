//! earn_keeper: cross-chain earner registry keeper.
//!
//! Mirrors the EVM earner list into the Solana earn program with Merkle proofs, distributes
//! yield by time-weighted balance under a simulated ceiling, and pushes a stale accrual index
//! back across the portal. Every mutating path simulates before it signs.

pub mod chain;
pub mod compute;
pub mod config;
pub mod context;
pub mod distribute;
pub mod error;
pub mod index;
pub mod merkle;
pub mod registry;
pub mod tx;
pub mod verify;

pub use chain::{
    BalanceHistory, Cache, EvmClient, EvmRpc, EvmSigner, HistoryClient, RpcConfig, SolanaClient,
    SolanaRpc,
};
pub use compute::{time_weighted_balance, BalanceUpdate};
pub use config::{ConfigError, KeeperConfig};
pub use context::CycleContext;
pub use distribute::{CeilingPolicy, ClaimEngine, ClaimOperation, DistributionBatch};
pub use error::{DecodeError, KeeperError, Result};
pub use index::{AccrualIndex, IndexMonitor, MonitorState};
pub use merkle::{ExclusionProof, MerkleProof, MerkleTree};
pub use registry::{RegistryOperation, SetReconciler};
pub use tx::{FeeParams, Pubkey, TransactionPipeline};
pub use verify::{reproducibility_hash, DistributionManifest, VerificationResult};
