//! Time-weighted average balance over an accrual window.

use crate::chain::normalize::{de_amount, de_timestamp};
use crate::tx::Pubkey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputValidationError {
    #[error("empty window: end {end} is not after start {start}")]
    EmptyWindow { start: i64, end: i64 },
    #[error("update at {timestamp} outside window [{start}, {end}]")]
    OutOfWindow { timestamp: i64, start: i64, end: i64 },
    #[error("updates out of order: {later} precedes {earlier}")]
    Unordered { earlier: i64, later: i64 },
    #[error("history for window starting {start} exceeds {limit} updates")]
    HistoryTruncated { start: i64, limit: usize },
}

/// One balance change of an account, as reported by the history service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    #[serde(with = "crate::tx::serde_pubkey")]
    pub account: Pubkey,
    #[serde(deserialize_with = "de_amount")]
    pub pre_balance: u64,
    #[serde(deserialize_with = "de_amount")]
    pub post_balance: u64,
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: i64,
    /// Transaction signature (or other source reference) that produced the change.
    pub provenance: String,
}

/// Average balance over `[window_start, window_end]`.
///
/// `starting_balance` is where the walk starts: the balance held at `window_end`.
/// Walking back from the newest update, the balance in effect is weighted by the time
/// until the next later point, then replaced by that update's `pre_balance`. The
/// earliest interval runs from `window_start` to the first update. `updates` must be
/// ascending and inside the window; out-of-order input is rejected, never re-sorted.
pub fn time_weighted_balance(
    starting_balance: u64,
    window_start: i64,
    window_end: i64,
    updates: &[BalanceUpdate],
) -> Result<u64, InputValidationError> {
    if window_end <= window_start {
        return Err(InputValidationError::EmptyWindow {
            start: window_start,
            end: window_end,
        });
    }
    validate_updates(window_start, window_end, updates)?;
    if updates.is_empty() {
        return Ok(starting_balance);
    }

    let mut weighted: u128 = 0;
    let mut balance = starting_balance;
    let mut next_ts = window_end;
    for update in updates.iter().rev() {
        let held = (next_ts - update.timestamp) as u128;
        weighted += u128::from(balance) * held;
        balance = update.pre_balance;
        next_ts = update.timestamp;
    }
    weighted += u128::from(balance) * (next_ts - window_start) as u128;

    let span = (window_end - window_start) as u128;
    // Average of u64 balances always fits back into u64.
    Ok((weighted / span) as u64)
}

fn validate_updates(
    window_start: i64,
    window_end: i64,
    updates: &[BalanceUpdate],
) -> Result<(), InputValidationError> {
    let mut prev: Option<i64> = None;
    for u in updates {
        if u.timestamp < window_start || u.timestamp > window_end {
            return Err(InputValidationError::OutOfWindow {
                timestamp: u.timestamp,
                start: window_start,
                end: window_end,
            });
        }
        if let Some(p) = prev {
            if u.timestamp < p {
                return Err(InputValidationError::Unordered {
                    earlier: p,
                    later: u.timestamp,
                });
            }
        }
        prev = Some(u.timestamp);
    }
    Ok(())
}
