//! Solana transaction construction on the SDK types: program ids, compute budget,
//! packet sizing and the submit pipeline.

mod keys;
mod message;
mod pipeline;

pub use keys::{associated_token_address, parse_pubkey, programs, serde_pubkey};
pub use message::{compile, encode, MessageError, PACKET_DATA_SIZE};
pub use pipeline::{
    compute_unit_limit, compute_unit_price, FeeParams, PreparedTransaction, SubmitOutcome,
    TransactionPipeline,
};
pub use solana_sdk::hash::Hash as Blockhash;
pub use solana_sdk::instruction::{AccountMeta, Instruction};
pub use solana_sdk::pubkey::Pubkey;
pub use solana_sdk::signature::{Keypair, Signer};
pub use solana_sdk::transaction::Transaction;
