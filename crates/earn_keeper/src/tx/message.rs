//! Legacy message compilation and wire encoding over the SDK types.

use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use thiserror::Error;

/// Maximum serialized transaction size accepted by the network.
pub const PACKET_DATA_SIZE: usize = 1232;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("serialized transaction is {0} bytes, limit {PACKET_DATA_SIZE}")]
    TooLarge(usize),
    #[error("sign: {0}")]
    Sign(String),
    #[error("encode: {0}")]
    Encode(String),
}

/// Unsigned transaction with `payer` as fee payer and first signer. Signature slots are
/// zero-filled, which simulation accepts with signature checks off.
pub fn compile(instructions: &[Instruction], payer: &Pubkey, blockhash: &Hash) -> Transaction {
    Transaction::new_unsigned(Message::new_with_blockhash(
        instructions,
        Some(payer),
        blockhash,
    ))
}

/// Wire bytes of `tx`, refused when over one packet.
pub fn encode(tx: &Transaction) -> Result<Vec<u8>, MessageError> {
    let raw = bincode::serialize(tx).map_err(|e| MessageError::Encode(e.to_string()))?;
    if raw.len() > PACKET_DATA_SIZE {
        return Err(MessageError::TooLarge(raw.len()));
    }
    Ok(raw)
}

pub fn serialized_size(tx: &Transaction) -> Result<usize, MessageError> {
    bincode::serialized_size(tx)
        .map(|n| n as usize)
        .map_err(|e| MessageError::Encode(e.to_string()))
}
