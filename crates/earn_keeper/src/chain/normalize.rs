//! Normalization of timestamps and integer amounts arriving as loosely-typed JSON.

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("invalid time: {0}")]
    InvalidTime(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// Parse RFC3339 timestamp into Unix seconds.
pub fn parse_time_rfc3339(s: &str) -> Result<i64, NormalizeError> {
    let dt = OffsetDateTime::parse(s.trim(), &Rfc3339)
        .map_err(|e| NormalizeError::InvalidTime(e.to_string()))?;
    Ok(dt.unix_timestamp())
}

/// Unix seconds from either a decimal string or RFC3339.
pub fn normalize_timestamp(s: &str) -> Result<i64, NormalizeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(NormalizeError::InvalidTime("empty".to_string()));
    }
    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }
    parse_time_rfc3339(s)
}

/// Base-unit amount from a decimal string. Fractional or signed input is rejected.
pub fn normalize_amount(s: &str) -> Result<u64, NormalizeError> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| NormalizeError::InvalidAmount(s.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(i64),
    Str(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AmountRepr {
    Num(u64),
    Str(String),
}

pub(crate) fn de_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match NumOrString::deserialize(d)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => normalize_timestamp(&s).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn de_amount<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match AmountRepr::deserialize(d)? {
        AmountRepr::Num(n) => Ok(n),
        AmountRepr::Str(s) => normalize_amount(&s).map_err(serde::de::Error::custom),
    }
}
