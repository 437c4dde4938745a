//! Time-weighted balance math.

mod twb;

pub use twb::{time_weighted_balance, BalanceUpdate, InputValidationError};
