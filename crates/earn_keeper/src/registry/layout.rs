//! Account layouts of the earn program and its derived addresses.

use crate::error::DecodeError;
use crate::merkle::Hash;
use crate::tx::Pubkey;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const DISCRIMINATOR_LEN: usize = 8;

/// Byte offset of the accrual index inside the global account.
pub const GLOBAL_INDEX_OFFSET: usize = 136;
/// Byte offset of the index's last-update timestamp inside the global account.
pub const GLOBAL_TIMESTAMP_OFFSET: usize = 144;

pub const GLOBAL_SEED: &[u8] = b"global";
pub const EARNER_SEED: &[u8] = b"earner";
pub const TOKEN_AUTHORITY_SEED: &[u8] = b"token_authority";

/// sha256("account:<Name>")[..8].
pub fn account_discriminator(name: &str) -> [u8; 8] {
    prefixed_discriminator("account", name)
}

pub(crate) fn prefixed_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
pub struct GlobalState {
    #[serde(with = "crate::tx::serde_pubkey")]
    pub admin: Pubkey,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub earn_authority: Pubkey,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub portal_authority: Pubkey,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub mint: Pubkey,
    pub index: u64,
    pub timestamp: u64,
    pub claim_cooldown: u64,
    pub max_supply: u64,
    pub max_yield: u64,
    pub distributed: u64,
    pub claim_complete: bool,
    #[serde(with = "crate::merkle::tree::hex_hash")]
    pub earner_merkle_root: Hash,
    #[serde(with = "crate::merkle::tree::hex_hash")]
    pub earn_manager_merkle_root: Hash,
    pub bump: u8,
}

impl GlobalState {
    pub const NAME: &'static str = "Global";
    pub const LEN: usize = DISCRIMINATOR_LEN + 4 * 32 + 6 * 8 + 1 + 2 * 32 + 1;

    pub fn decode(account: &Pubkey, data: &[u8]) -> Result<Self, DecodeError> {
        decode_anchor(account, Self::NAME, data)
    }

    /// Yield still allowed this cycle.
    pub fn remaining_yield(&self) -> u64 {
        self.max_yield.saturating_sub(self.distributed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
pub struct EarnerAccount {
    #[serde(with = "crate::tx::serde_pubkey")]
    pub user: Pubkey,
    pub last_claim_index: u64,
    pub last_claim_timestamp: u64,
    pub bump: u8,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub user_token_account: Pubkey,
    /// Set for manager-approved earners; registrar earners have none.
    #[serde(with = "crate::tx::serde_pubkey::option")]
    pub earn_manager: Option<Pubkey>,
    /// Where yield is paid when it is not the user's own token account.
    #[serde(with = "crate::tx::serde_pubkey::option")]
    pub recipient_token_account: Option<Pubkey>,
}

impl EarnerAccount {
    pub const NAME: &'static str = "Earner";
    /// Allocated size: both options are reserved in full even when `None`.
    pub const LEN: usize = DISCRIMINATOR_LEN + 32 + 8 + 8 + 1 + 32 + 2 * 33;

    pub fn decode(account: &Pubkey, data: &[u8]) -> Result<Self, DecodeError> {
        decode_anchor(account, Self::NAME, data)
    }
}

fn decode_anchor<T: BorshDeserialize>(
    account: &Pubkey,
    name: &str,
    data: &[u8],
) -> Result<T, DecodeError> {
    let reject = |reason: String| DecodeError::Account {
        account: account.to_string(),
        reason,
    };
    if data.len() < DISCRIMINATOR_LEN {
        return Err(reject(format!("{} bytes, shorter than discriminator", data.len())));
    }
    if data[..DISCRIMINATOR_LEN] != account_discriminator(name) {
        return Err(reject(format!("not a {name} account")));
    }
    // Trailing bytes are allowed: accounts may be allocated larger than the struct.
    let mut rest = &data[DISCRIMINATOR_LEN..];
    T::deserialize(&mut rest).map_err(|e| reject(format!("{name}: {e}")))
}

/// Little-endian u64 at `offset`, for reading single fields without a full decode.
pub fn read_u64_at(account: &Pubkey, data: &[u8], offset: usize) -> Result<u64, DecodeError> {
    data.get(offset..offset + 8)
        .and_then(|s| s.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| DecodeError::Account {
            account: account.to_string(),
            reason: format!("{} bytes, no u64 at offset {offset}", data.len()),
        })
}

/// Program-derived addresses of the earn program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramAddresses {
    pub program_id: Pubkey,
    pub global: Pubkey,
    pub token_authority: Pubkey,
}

impl ProgramAddresses {
    pub fn derive(program_id: Pubkey) -> Result<Self, DecodeError> {
        let pda = |seed: &[u8]| {
            Pubkey::try_find_program_address(&[seed], &program_id)
                .map(|(key, _)| key)
                .ok_or_else(|| DecodeError::Account {
                    account: program_id.to_string(),
                    reason: "no program address for seed".to_string(),
                })
        };
        Ok(Self {
            program_id,
            global: pda(GLOBAL_SEED)?,
            token_authority: pda(TOKEN_AUTHORITY_SEED)?,
        })
    }

    /// Earner account of a registered token account.
    pub fn earner(&self, user_token_account: &Pubkey) -> Option<Pubkey> {
        Pubkey::try_find_program_address(&[EARNER_SEED, user_token_account.as_ref()], &self.program_id)
            .map(|(key, _)| key)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn global_bytes(state: &GlobalState) -> Vec<u8> {
        let mut out = account_discriminator(GlobalState::NAME).to_vec();
        out.extend(borsh::to_vec(state).unwrap());
        out
    }

    /// Zero-padded to the allocated size, as the program creates them.
    pub(crate) fn earner_bytes(earner: &EarnerAccount) -> Vec<u8> {
        let mut out = account_discriminator(EarnerAccount::NAME).to_vec();
        out.extend(borsh::to_vec(earner).unwrap());
        out.resize(out.len().max(EarnerAccount::LEN), 0);
        out
    }

    pub(crate) fn sample_global() -> GlobalState {
        GlobalState {
            admin: Pubkey::new_from_array([1; 32]),
            earn_authority: Pubkey::new_from_array([2; 32]),
            portal_authority: Pubkey::new_from_array([3; 32]),
            mint: Pubkey::new_from_array([4; 32]),
            index: 1_050_000_000_000,
            timestamp: 1_700_000_000,
            claim_cooldown: 86_400,
            max_supply: 10_000_000,
            max_yield: 5_000,
            distributed: 1_200,
            claim_complete: false,
            earner_merkle_root: [9; 32],
            earn_manager_merkle_root: [8; 32],
            bump: 254,
        }
    }

    #[test]
    fn global_layout_offsets() {
        let state = sample_global();
        let data = global_bytes(&state);
        assert_eq!(data.len(), GlobalState::LEN);
        let key = Pubkey::new_from_array([7; 32]);
        assert_eq!(read_u64_at(&key, &data, GLOBAL_INDEX_OFFSET).unwrap(), state.index);
        assert_eq!(
            read_u64_at(&key, &data, GLOBAL_TIMESTAMP_OFFSET).unwrap(),
            state.timestamp
        );
        assert_eq!(GlobalState::decode(&key, &data).unwrap(), state);
        assert_eq!(data[GlobalState::LEN - 1], state.bump);
        assert_eq!(state.remaining_yield(), 3_800);
    }

    #[test]
    fn earner_decodes_at_allocated_size() {
        let mut earner = EarnerAccount {
            user: Pubkey::new_from_array([5; 32]),
            last_claim_index: 1_000_000_000_000,
            last_claim_timestamp: 1_699_000_000,
            bump: 255,
            user_token_account: Pubkey::new_from_array([6; 32]),
            earn_manager: None,
            recipient_token_account: None,
        };
        let data = earner_bytes(&earner);
        assert_eq!(data.len(), EarnerAccount::LEN);
        assert_eq!(EarnerAccount::decode(&Pubkey::default(), &data).unwrap(), earner);

        earner.earn_manager = Some(Pubkey::new_from_array([7; 32]));
        earner.recipient_token_account = Some(Pubkey::new_from_array([8; 32]));
        let full = earner_bytes(&earner);
        assert_eq!(full.len(), EarnerAccount::LEN);
        assert_eq!(EarnerAccount::decode(&Pubkey::default(), &full).unwrap(), earner);
    }

    #[test]
    fn wrong_discriminator_rejected() {
        let data = global_bytes(&sample_global());
        let err = EarnerAccount::decode(&Pubkey::default(), &data).unwrap_err();
        assert!(err.to_string().contains("not a Earner account"));
        assert!(GlobalState::decode(&Pubkey::default(), &data[..40]).is_err());
        assert!(read_u64_at(&Pubkey::default(), &data[..100], GLOBAL_TIMESTAMP_OFFSET).is_err());
    }

    #[test]
    fn derived_addresses_are_stable() {
        let program = Pubkey::new_from_array([77; 32]);
        let a = ProgramAddresses::derive(program).unwrap();
        let b = ProgramAddresses::derive(program).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.global, a.token_authority);
        let token_account = Pubkey::new_from_array([8; 32]);
        assert_eq!(a.earner(&token_account), b.earner(&token_account));
    }
}
