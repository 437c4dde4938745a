//! Chain access: rate-limited transports, typed RPC clients, balance history and caching.

pub mod abi;
mod cache;
pub mod contracts;
pub mod evm;
#[cfg(test)]
pub(crate) mod fake;
pub mod history;
pub(crate) mod normalize;
mod rpc;
mod solana;

pub use cache::{Cache, CacheError};
pub use contracts::{EarnerSource, Portal, DEFAULT_TRANSCEIVER_INSTRUCTIONS};
pub use evm::{CallRequest, EvmAddress, EvmClient, EvmRpc, EvmSigner, LegacyTx, TxReceipt};
pub use history::{BalanceHistory, HistoryClient, HistoryConfig, HistoryQuery};
pub use normalize::{normalize_amount, normalize_timestamp, parse_time_rfc3339, NormalizeError};
pub use rpc::{HttpTransport, RpcConfig, RpcError};
pub use solana::{
    AccountFilter, ConfirmationLevel, RecentBlockhash, SignatureStatus, SimulationOutcome,
    SolanaClient, SolanaRpc,
};
