//! Crate-level error taxonomy.

use crate::chain::RpcError;
use crate::compute::InputValidationError;
use crate::config::ConfigError;
use crate::merkle::ProofError;
use crate::tx::MessageError;
use thiserror::Error;

/// Failure to turn an external payload into a typed record.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("base58: {0}")]
    Base58(String),
    #[error("hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("borsh: {0}")]
    Borsh(#[from] std::io::Error),
    #[error("account {account}: {reason}")]
    Account { account: String, reason: String },
    #[error("abi: {0}")]
    Abi(String),
    #[error("unexpected response: {0}")]
    Response(String),
}

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("input validation: {0}")]
    InputValidation(#[from] InputValidationError),
    #[error("proof: {0}")]
    Proof(#[from] ProofError),
    #[error("simulation rejected: {0}")]
    Simulation(String),
    #[error("over-distribution: simulated total {simulated} exceeds ceiling {ceiling}")]
    OverDistribution { simulated: u64, ceiling: u64 },
    #[error("transaction {signature} expired: block height passed {last_valid_block_height}")]
    TransactionExpired {
        signature: String,
        last_valid_block_height: u64,
    },
    #[error("transaction {signature} failed: {reason}")]
    TransactionFailed { signature: String, reason: String },
    #[error("network: {0}")]
    Network(#[from] RpcError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("accrual index regression: source {source_index} below mirrored {mirrored_index}")]
    IndexRegression {
        source_index: u64,
        mirrored_index: u64,
    },
    #[error("transaction encoding: {0}")]
    Encoding(#[from] MessageError),
    #[error("signer: {0}")]
    Signer(String),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

impl KeeperError {
    /// True for errors that must abort a whole batch rather than a single address.
    pub fn is_batch_fatal(&self) -> bool {
        !matches!(self, Self::InputValidation(_) | Self::Proof(_))
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;
