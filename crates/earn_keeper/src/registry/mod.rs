//! Earn program interface and earner-set reconciliation.

pub mod events;
pub mod instructions;
pub(crate) mod layout;
mod reconcile;

pub use events::{rewards_claims, RewardsClaim};
pub use instructions::ClaimAccounts;
pub use layout::{
    account_discriminator, read_u64_at, EarnerAccount, GlobalState, ProgramAddresses,
    GLOBAL_INDEX_OFFSET, GLOBAL_TIMESTAMP_OFFSET,
};
pub use reconcile::{
    apply_operations, fetch_earners, ApplyReport, MirroredEarner, RegistryOperation,
    SetReconciler,
};
