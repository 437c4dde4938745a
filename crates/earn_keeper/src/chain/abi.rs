//! Solidity ABI encoding for the few calls the keeper makes, and strict decoding
//! of their return data.

use crate::error::DecodeError;
use sha3::{Digest, Keccak256};

pub type Word = [u8; 32];

/// First 4 bytes of keccak256 of the canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Argument values. Every static type is one word; `Bytes` is dynamic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Uint(u128),
    FixedBytes(Word),
    Bytes(Vec<u8>),
}

fn uint_word(n: u128) -> Word {
    let mut w = [0u8; 32];
    w[16..].copy_from_slice(&n.to_be_bytes());
    w
}

fn pad_right(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.resize(data.len().div_ceil(32) * 32, 0);
    out
}

/// Calldata: selector, heads, then tails of dynamic arguments.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let head_len = 32 * args.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for arg in args {
        match arg {
            Token::Uint(n) => head.extend_from_slice(&uint_word(*n)),
            Token::FixedBytes(w) => head.extend_from_slice(w),
            Token::Bytes(b) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                tail.extend_from_slice(&uint_word(b.len() as u128));
                tail.extend_from_slice(&pad_right(b));
            }
        }
    }
    let mut out = Vec::with_capacity(4 + head.len() + tail.len());
    out.extend_from_slice(&selector(signature));
    out.extend_from_slice(&head);
    out.extend_from_slice(&tail);
    out
}

pub fn word_at(data: &[u8], index: usize) -> Result<Word, DecodeError> {
    let start = index
        .checked_mul(32)
        .ok_or_else(|| DecodeError::Abi(format!("word index {index} out of range")))?;
    data.get(start..start.saturating_add(32))
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            DecodeError::Abi(format!("return data too short for word {index} ({} bytes)", data.len()))
        })
}

/// uint256 word narrowed to u128; a value that does not fit is an error, not a truncation.
pub fn word_to_u128(word: &Word) -> Result<u128, DecodeError> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(DecodeError::Abi(format!(
            "uint256 0x{} exceeds 128 bits",
            hex::encode(word)
        )));
    }
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(raw))
}

pub fn word_to_u64(word: &Word) -> Result<u64, DecodeError> {
    let n = word_to_u128(word)?;
    u64::try_from(n).map_err(|_| DecodeError::Abi(format!("uint256 {n} exceeds 64 bits")))
}

pub fn decode_u128(data: &[u8], index: usize) -> Result<u128, DecodeError> {
    word_to_u128(&word_at(data, index)?)
}

pub fn decode_u64(data: &[u8], index: usize) -> Result<u64, DecodeError> {
    word_to_u64(&word_at(data, index)?)
}

fn decode_offset(data: &[u8], index: usize) -> Result<usize, DecodeError> {
    let raw = decode_u64(data, index)?;
    let offset = usize::try_from(raw).map_err(|_| DecodeError::Abi(format!("offset {raw}")))?;
    if offset % 32 != 0 {
        return Err(DecodeError::Abi(format!("misaligned offset {offset}")));
    }
    Ok(offset)
}

/// Dynamic array of static 32-byte elements whose head sits at word `index`.
pub fn decode_word_array(data: &[u8], index: usize) -> Result<Vec<Word>, DecodeError> {
    let base = decode_offset(data, index)? / 32;
    let len = decode_u64(data, base)?;
    let len = usize::try_from(len).map_err(|_| DecodeError::Abi(format!("array length {len}")))?;
    let end = base
        .checked_add(1)
        .and_then(|n| n.checked_add(len))
        .and_then(|n| n.checked_mul(32));
    if !end.is_some_and(|end| data.len() >= end) {
        return Err(DecodeError::Abi(format!(
            "array of {len} words overruns {} bytes",
            data.len()
        )));
    }
    (0..len).map(|i| word_at(data, base + 1 + i)).collect()
}

/// `0x`-prefixed hex to bytes; `0x` alone is empty.
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(hex::decode(s.trim().trim_start_matches("0x"))?)
}

/// JSON-RPC quantity (`0x`-prefixed, no leading zeros required).
pub fn parse_quantity(s: &str) -> Result<u128, DecodeError> {
    let digits = s.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Err(DecodeError::Abi(format!("empty quantity {s:?}")));
    }
    u128::from_str_radix(digits, 16).map_err(|e| DecodeError::Abi(format!("quantity {s:?}: {e}")))
}

pub fn to_quantity(n: u128) -> String {
    format!("0x{n:x}")
}
