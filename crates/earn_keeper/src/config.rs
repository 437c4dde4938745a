//! Keeper configuration, loaded from a JSON file.
//!
//! Every section is optional and falls back to its defaults. The CLI resolves the file
//! from `--config`, then `EARN_KEEPER_CONFIG`, then `./config/earn_keeper.json`.

use crate::chain::{EvmAddress, HistoryConfig, RpcConfig, DEFAULT_TRANSCEIVER_INSTRUCTIONS};
use crate::distribute::ClaimsConfig;
use crate::index::{MonitorConfig, PushParams};
use crate::tx::{parse_pubkey, programs, FeeParams, Pubkey};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const CONFIG_ENV: &str = "EARN_KEEPER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./config/earn_keeper.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub earn_program_id: String,
    /// Expected mint; checked against the global account when set.
    pub mint: Option<String>,
    pub token_program: String,
    pub commitment: String,
    /// JSON byte-array keypair file of the earn authority.
    pub keypair_path: Option<String>,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            earn_program_id: String::new(),
            mint: None,
            token_program: programs::token_2022().to_string(),
            commitment: "confirmed".to_string(),
            keypair_path: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EvmConfig {
    pub rpc_url: String,
    /// Contract exposing `getEarners()`, `currentIndex()` and `earnerRate()`.
    pub earner_source: String,
    pub portal: String,
    /// Wormhole chain id of the destination.
    pub destination_chain: u16,
    /// Hex-encoded transceiver instructions.
    pub transceiver_instructions: String,
    /// Expected EVM chain id; compared against `eth_chainId` before signing.
    pub chain_id: Option<u64>,
    /// Name of the environment variable holding the hex private key.
    pub private_key_env: String,
}

impl Default for EvmConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            earner_source: String::new(),
            portal: String::new(),
            destination_chain: 1,
            transceiver_instructions: hex::encode(DEFAULT_TRANSCEIVER_INSTRUCTIONS),
            chain_id: None,
            private_key_env: "EARN_KEEPER_EVM_KEY".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub solana: SolanaConfig,
    pub evm: EvmConfig,
    pub history: HistoryConfig,
    pub claims: ClaimsConfig,
    pub fees: FeeParams,
    pub monitor: MonitorConfig,
    pub rpc: RpcConfig,
}

fn invalid(field: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = url::Url::parse(value).map_err(|e| invalid(field, format!("{value}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(field, format!("unsupported scheme {other}"))),
    }
}

impl KeeperConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path, then the environment-provided path, then the default location.
    pub fn resolve_path(explicit: Option<&Path>, from_env: Option<&str>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| from_env.filter(|s| !s.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Endpoint syntax only; addresses are checked when the command that needs them runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("solana.rpc_url", &self.solana.rpc_url)?;
        check_url("evm.rpc_url", &self.evm.rpc_url)?;
        check_url("history.base_url", &self.history.base_url)?;
        if self.claims.index_base == 0 {
            return Err(invalid("claims.index_base", "must be positive"));
        }
        if self.fees.max_instructions_per_tx == 0 {
            return Err(invalid("fees.max_instructions_per_tx", "must be positive"));
        }
        Ok(())
    }

    pub fn program_id(&self) -> Result<Pubkey, ConfigError> {
        parse_pubkey(&self.solana.earn_program_id).map_err(|e| invalid("solana.earn_program_id", e))
    }

    pub fn token_program(&self) -> Result<Pubkey, ConfigError> {
        parse_pubkey(&self.solana.token_program).map_err(|e| invalid("solana.token_program", e))
    }

    pub fn expected_mint(&self) -> Result<Option<Pubkey>, ConfigError> {
        self.solana
            .mint
            .as_deref()
            .map(parse_pubkey)
            .transpose()
            .map_err(|e| invalid("solana.mint", e))
    }

    pub fn earner_source(&self) -> Result<EvmAddress, ConfigError> {
        EvmAddress::from_str(&self.evm.earner_source).map_err(|e| invalid("evm.earner_source", e))
    }

    pub fn portal(&self) -> Result<EvmAddress, ConfigError> {
        EvmAddress::from_str(&self.evm.portal).map_err(|e| invalid("evm.portal", e))
    }

    pub fn push_params(&self) -> Result<PushParams, ConfigError> {
        let raw = self.evm.transceiver_instructions.trim_start_matches("0x");
        Ok(PushParams {
            destination_chain: self.evm.destination_chain,
            transceiver_instructions: hex::decode(raw)
                .map_err(|e| invalid("evm.transceiver_instructions", e))?,
            chain_id: self.evm.chain_id,
        })
    }
}
