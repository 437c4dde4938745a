//! Solana JSON-RPC client and the trait the pipeline and engines are written against.

use crate::chain::normalize::normalize_amount;
use crate::chain::rpc::{HttpTransport, RpcConfig, RpcError};
use crate::error::{DecodeError, Result};
use crate::tx::{parse_pubkey, Blockhash, Pubkey};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Server-side account filter for program scans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountFilter {
    DataSize(u64),
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    fn to_json(&self) -> Value {
        match self {
            Self::DataSize(n) => json!({ "dataSize": n }),
            Self::Memcmp { offset, bytes } => json!({
                "memcmp": { "offset": offset, "bytes": bs58::encode(bytes).into_string() }
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecentBlockhash {
    pub blockhash: Blockhash,
    pub last_valid_block_height: u64,
}

/// Result of a non-mutating transaction simulation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationOutcome {
    pub err: Option<Value>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationLevel {
    Processed,
    Confirmed,
    Finalized,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SignatureStatus {
    pub confirmation: Option<ConfirmationLevel>,
    pub err: Option<Value>,
}

/// Reads and writes against the ledger chain. Implemented over JSON-RPC by
/// [`SolanaClient`]; tests substitute in-memory fakes.
#[async_trait]
pub trait SolanaRpc: Send + Sync {
    /// Raw account data, `None` if the account does not exist.
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>>;
    async fn program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>>;
    async fn token_balance(&self, token_account: &Pubkey) -> Result<u64>;
    async fn latest_blockhash(&self) -> Result<RecentBlockhash>;
    /// Simulate a serialized transaction without signature verification.
    async fn simulate(&self, tx: &[u8]) -> Result<SimulationOutcome>;
    /// Submit a signed transaction; returns its base58 signature.
    async fn send(&self, tx: &[u8]) -> Result<String>;
    async fn signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>>;
    async fn block_height(&self) -> Result<u64>;
}

pub struct SolanaClient {
    transport: HttpTransport,
    commitment: String,
}

#[derive(Deserialize)]
struct Contextual<T> {
    value: T,
}

#[derive(Deserialize)]
struct UiAccount {
    data: (String, String),
}

#[derive(Deserialize)]
struct KeyedAccount {
    pubkey: String,
    account: UiAccount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiSimulation {
    err: Option<Value>,
    logs: Option<Vec<String>>,
    units_consumed: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiSignatureStatus {
    confirmation_status: Option<ConfirmationLevel>,
    err: Option<Value>,
}

#[derive(Deserialize)]
struct UiTokenAmount {
    amount: String,
}

impl SolanaClient {
    pub fn new(url: &str, commitment: &str, config: RpcConfig) -> std::result::Result<Self, RpcError> {
        Ok(Self {
            transport: HttpTransport::new(url, config)?,
            commitment: commitment.to_string(),
        })
    }

    pub fn request_count(&self) -> u64 {
        self.transport.request_count()
    }
}

fn decode_account_data(account: &str, data: &(String, String)) -> Result<Vec<u8>> {
    if data.1 != "base64" {
        return Err(DecodeError::Account {
            account: account.to_string(),
            reason: format!("unexpected encoding {}", data.1),
        }
        .into());
    }
    Ok(BASE64.decode(&data.0).map_err(DecodeError::from)?)
}

fn decode_hash(s: &str) -> Result<Blockhash> {
    let hash = s
        .parse::<Blockhash>()
        .map_err(|e| DecodeError::Base58(format!("blockhash {s}: {e}")))?;
    Ok(hash)
}

#[async_trait]
impl SolanaRpc for SolanaClient {
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let params = json!([address.to_string(), { "encoding": "base64", "commitment": self.commitment }]);
        let res: Contextual<Option<UiAccount>> =
            self.transport.call("getAccountInfo", params).await?;
        res.value
            .map(|acc| decode_account_data(&address.to_string(), &acc.data))
            .transpose()
    }

    async fn program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>> {
        let filters: Vec<Value> = filters.iter().map(AccountFilter::to_json).collect();
        let params = json!([program_id.to_string(), {
            "encoding": "base64",
            "commitment": self.commitment,
            "filters": filters,
        }]);
        let res: Vec<KeyedAccount> = self.transport.call("getProgramAccounts", params).await?;
        debug!(count = res.len(), program = %program_id, "program accounts");
        res.into_iter()
            .map(|keyed| {
                let key = parse_pubkey(&keyed.pubkey)?;
                let data = decode_account_data(&keyed.pubkey, &keyed.account.data)?;
                Ok((key, data))
            })
            .collect()
    }

    async fn token_balance(&self, token_account: &Pubkey) -> Result<u64> {
        let params = json!([token_account.to_string(), { "commitment": self.commitment }]);
        let res: Contextual<UiTokenAmount> =
            self.transport.call("getTokenAccountBalance", params).await?;
        Ok(normalize_amount(&res.value.amount)
            .map_err(|e| DecodeError::Response(e.to_string()))?)
    }

    async fn latest_blockhash(&self) -> Result<RecentBlockhash> {
        let params = json!([{ "commitment": self.commitment }]);
        let res: Contextual<UiBlockhash> = self.transport.call("getLatestBlockhash", params).await?;
        Ok(RecentBlockhash {
            blockhash: decode_hash(&res.value.blockhash)?,
            last_valid_block_height: res.value.last_valid_block_height,
        })
    }

    async fn simulate(&self, tx: &[u8]) -> Result<SimulationOutcome> {
        let params = json!([BASE64.encode(tx), {
            "encoding": "base64",
            "sigVerify": false,
            "replaceRecentBlockhash": true,
            "commitment": self.commitment,
        }]);
        let res: Contextual<UiSimulation> =
            self.transport.call("simulateTransaction", params).await?;
        Ok(SimulationOutcome {
            err: res.value.err.filter(|e| !e.is_null()),
            logs: res.value.logs.unwrap_or_default(),
            units_consumed: res.value.units_consumed,
        })
    }

    async fn send(&self, tx: &[u8]) -> Result<String> {
        let params = json!([BASE64.encode(tx), {
            "encoding": "base64",
            "skipPreflight": false,
            "preflightCommitment": self.commitment,
            "maxRetries": 0,
        }]);
        self.transport.call("sendTransaction", params).await
    }

    async fn signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>> {
        let params = json!([[signature], { "searchTransactionHistory": false }]);
        let res: Contextual<Vec<Option<UiSignatureStatus>>> =
            self.transport.call("getSignatureStatuses", params).await?;
        Ok(res.value.into_iter().next().flatten().map(|s| SignatureStatus {
            confirmation: s.confirmation_status,
            err: s.err.filter(|e| !e.is_null()),
        }))
    }

    async fn block_height(&self) -> Result<u64> {
        let params = json!([{ "commitment": self.commitment }]);
        self.transport.call("getBlockHeight", params).await
    }
}
