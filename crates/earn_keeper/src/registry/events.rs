//! Events emitted by the earn program, recovered from transaction logs.

use crate::registry::layout::prefixed_discriminator;
use crate::tx::Pubkey;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::Serialize;
use tracing::debug;

const PROGRAM_DATA: &str = "Program data: ";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
pub struct RewardsClaim {
    #[serde(with = "crate::tx::serde_pubkey")]
    pub token_account: Pubkey,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub recipient_token_account: Pubkey,
    pub amount: u64,
    pub ts: u64,
    pub index: u64,
    pub fee: u64,
}

impl RewardsClaim {
    pub const NAME: &'static str = "RewardsClaim";

    pub fn discriminator() -> [u8; 8] {
        prefixed_discriminator("event", Self::NAME)
    }
}

/// Every `RewardsClaim` in `logs`. Lines carrying other events or undecodable data are skipped.
pub fn rewards_claims(logs: &[String]) -> Vec<RewardsClaim> {
    let disc = RewardsClaim::discriminator();
    logs.iter()
        .filter_map(|line| line.strip_prefix(PROGRAM_DATA))
        .filter_map(|b64| BASE64.decode(b64.trim()).ok())
        .filter(|raw| raw.len() > 8 && raw[..8] == disc)
        .filter_map(|raw| {
            let mut rest = &raw[8..];
            match RewardsClaim::deserialize(&mut rest) {
                Ok(ev) => Some(ev),
                Err(e) => {
                    debug!(error = %e, "undecodable RewardsClaim");
                    None
                }
            }
        })
        .collect()
}
