//! Well-known program ids, key parsing and the base58 serde form of [`Pubkey`].

use crate::error::DecodeError;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// Program ids the keeper references directly.
pub mod programs {
    use solana_sdk::pubkey;
    use solana_sdk::pubkey::Pubkey;

    pub const SYSTEM: Pubkey = pubkey!("11111111111111111111111111111111");
    pub const TOKEN_2022: Pubkey = pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");

    pub fn system() -> Pubkey {
        SYSTEM
    }

    pub fn token_2022() -> Pubkey {
        TOKEN_2022
    }
}

pub fn parse_pubkey(s: &str) -> Result<Pubkey, DecodeError> {
    Pubkey::from_str(s.trim()).map_err(|e| DecodeError::Base58(format!("{s}: {e}")))
}

/// Associated token account of `owner` for `mint` under `token_program`.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    spl_associated_token_account::get_associated_token_address_with_program_id(
        owner,
        mint,
        token_program,
    )
}

/// Serialize keys as base58 strings rather than byte arrays, for reports and manifests.
pub mod serde_pubkey {
    use super::parse_pubkey;
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        parse_pubkey(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::super::parse_pubkey;
        use serde::{Deserialize, Deserializer, Serializer};
        use solana_sdk::pubkey::Pubkey;

        pub fn serialize<S: Serializer>(
            key: &Option<Pubkey>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match key {
                Some(k) => serializer.collect_str(k),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Pubkey>, D::Error> {
            <Option<String> as Deserialize>::deserialize(deserializer)?
                .map(|s| parse_pubkey(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
