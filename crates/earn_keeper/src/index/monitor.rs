//! Index staleness check and the payable push that refreshes the Solana copy.

use crate::chain::contracts::address_word;
use crate::chain::{
    CallRequest, EarnerSource, EvmAddress, EvmRpc, EvmSigner, LegacyTx, Portal, RpcError,
    SolanaRpc, TxReceipt, DEFAULT_TRANSCEIVER_INSTRUCTIONS,
};
use crate::config::ConfigError;
use crate::error::{DecodeError, KeeperError, Result};
use crate::index::{AccrualIndex, IndexChain};
use crate::registry::{read_u64_at, GLOBAL_INDEX_OFFSET, GLOBAL_TIMESTAMP_OFFSET};
use crate::tx::Pubkey;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub staleness_threshold_secs: i64,
    /// Percent added on top of `eth_estimateGas`.
    pub gas_margin_pct: u64,
    pub receipt_poll_ms: u64,
    pub receipt_attempts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: 86_400,
            gas_margin_pct: 10,
            receipt_poll_ms: 3_000,
            receipt_attempts: 40,
        }
    }
}

/// Where and how the index is pushed.
#[derive(Clone, Debug)]
pub struct PushParams {
    pub destination_chain: u16,
    pub transceiver_instructions: Vec<u8>,
    /// Expected EVM chain id. A node reporting another id is refused before signing.
    pub chain_id: Option<u64>,
}

impl Default for PushParams {
    fn default() -> Self {
        Self {
            destination_chain: 1,
            transceiver_instructions: DEFAULT_TRANSCEIVER_INSTRUCTIONS.to_vec(),
            chain_id: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    CheckStaleness,
    Stale,
    Fresh,
    BuildPushOperation,
    DryRunStopped,
    Submitted,
    Confirmed,
    Failed,
}

impl MonitorState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Fresh | Self::DryRunStopped | Self::Confirmed | Self::Failed
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Staleness {
    pub mirrored: AccrualIndex,
    pub age_secs: i64,
    pub stale: bool,
    pub forced: bool,
}

/// A fully parameterised push, ready to sign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushOperation {
    pub source: AccrualIndex,
    pub quote: u128,
    pub call: CallRequest,
}

#[derive(Clone, Debug, Serialize)]
pub struct MonitorReport {
    pub state: MonitorState,
    pub transitions: Vec<MonitorState>,
    pub staleness: Option<Staleness>,
    pub source_index: Option<u64>,
    pub quote: Option<String>,
    pub transaction_hash: Option<String>,
    pub block_number: Option<u64>,
}

impl MonitorReport {
    fn new() -> Self {
        Self {
            state: MonitorState::Idle,
            transitions: vec![MonitorState::Idle],
            staleness: None,
            source_index: None,
            quote: None,
            transaction_hash: None,
            block_number: None,
        }
    }

    fn enter(&mut self, state: MonitorState) {
        debug!(from = ?self.state, to = ?state, "monitor transition");
        self.state = state;
        self.transitions.push(state);
    }
}

/// Stale iff `now - last_update > threshold`, or when forced.
pub fn is_stale(last_update: i64, now: i64, threshold_secs: i64, force: bool) -> bool {
    force || now.saturating_sub(last_update) > threshold_secs
}

pub struct IndexMonitor<'a> {
    solana: &'a dyn SolanaRpc,
    evm: &'a dyn EvmRpc,
    global: Pubkey,
    source: EarnerSource<'a>,
    portal: Portal<'a>,
    params: PushParams,
    config: MonitorConfig,
}

impl<'a> IndexMonitor<'a> {
    pub fn new(
        solana: &'a dyn SolanaRpc,
        evm: &'a dyn EvmRpc,
        global: Pubkey,
        source_contract: EvmAddress,
        portal_contract: EvmAddress,
        params: PushParams,
        config: MonitorConfig,
    ) -> Self {
        Self {
            solana,
            evm,
            global,
            source: EarnerSource::new(evm, source_contract),
            portal: Portal::new(evm, portal_contract),
            params,
            config,
        }
    }

    /// Read the mirrored index and its last-update timestamp straight from the global
    /// account bytes.
    pub async fn mirrored_index(&self) -> Result<AccrualIndex> {
        let data = self
            .solana
            .account_data(&self.global)
            .await?
            .ok_or_else(|| DecodeError::Account {
                account: self.global.to_string(),
                reason: "global account does not exist".to_string(),
            })?;
        let value = read_u64_at(&self.global, &data, GLOBAL_INDEX_OFFSET)?;
        let ts = read_u64_at(&self.global, &data, GLOBAL_TIMESTAMP_OFFSET)?;
        Ok(AccrualIndex {
            value,
            last_update: i64::try_from(ts).map_err(|_| DecodeError::Account {
                account: self.global.to_string(),
                reason: format!("index timestamp {ts} out of range"),
            })?,
            chain: IndexChain::Solana,
        })
    }

    pub async fn check_staleness(&self, now: i64, threshold_secs: i64, force: bool) -> Result<Staleness> {
        let mirrored = self.mirrored_index().await?;
        let age_secs = now.saturating_sub(mirrored.last_update);
        let stale = is_stale(mirrored.last_update, now, threshold_secs, force);
        info!(
            last_update = mirrored.last_update,
            age_secs,
            threshold_secs,
            stale,
            force,
            "index staleness"
        );
        Ok(Staleness {
            mirrored,
            age_secs,
            stale,
            forced: force,
        })
    }

    /// Read the source index, refuse a regression, quote the delivery and assemble the call.
    pub async fn build_push(
        &self,
        mirrored: &AccrualIndex,
        now: i64,
        sender: Option<EvmAddress>,
    ) -> Result<PushOperation> {
        let value = self.source.current_index().await?;
        if value < mirrored.value {
            return Err(KeeperError::IndexRegression {
                source_index: value,
                mirrored_index: mirrored.value,
            });
        }
        let quote = self
            .portal
            .quote_delivery_price(self.params.destination_chain, &self.params.transceiver_instructions)
            .await?;
        let refund = sender.map(|a| address_word(&a)).unwrap_or([0u8; 32]);
        let mut call = CallRequest::new(
            self.portal.address(),
            Portal::send_index_calldata(self.params.destination_chain, refund),
        );
        call.from = sender;
        call.value = quote;
        info!(
            source_index = value,
            mirrored_index = mirrored.value,
            quote = %quote,
            destination_chain = self.params.destination_chain,
            "index push built"
        );
        Ok(PushOperation {
            source: AccrualIndex {
                value,
                last_update: now,
                chain: IndexChain::Evm,
            },
            quote,
            call,
        })
    }

    /// Preflight, sign and send the push. Returns the transaction hash.
    pub async fn submit_push(&self, op: &PushOperation, signer: &EvmSigner) -> Result<String> {
        let mut call = op.call.clone();
        call.from = Some(signer.address());
        self.evm.call(&call).await.map_err(reverted)?;
        let estimate = self.evm.estimate_gas(&call).await.map_err(reverted)?;
        let gas_limit = estimate.saturating_mul(100 + self.config.gas_margin_pct) / 100;
        let gas_price = self.evm.gas_price().await?;
        let nonce = self.evm.transaction_count(&signer.address()).await?;
        let chain_id = self.evm.chain_id().await?;
        if let Some(expected) = self.params.chain_id.filter(|c| *c != chain_id) {
            return Err(ConfigError::Invalid {
                field: "evm.chain_id",
                reason: format!("node reports chain {chain_id}, expected {expected}"),
            }
            .into());
        }
        let tx = LegacyTx {
            nonce,
            gas_price,
            gas_limit,
            to: call.to,
            value: call.value,
            data: call.data,
        };
        let raw = signer.sign_legacy(&tx, chain_id)?;
        let hash = self.evm.send_raw_transaction(&raw).await?;
        info!(%hash, nonce, gas_limit, gas_price, "index push submitted");
        Ok(hash)
    }

    /// Poll for the receipt. `None` once the configured attempts run out.
    pub async fn await_receipt(&self, hash: &str) -> Result<Option<TxReceipt>> {
        for attempt in 0..self.config.receipt_attempts {
            if let Some(receipt) = self.evm.transaction_receipt(hash).await? {
                if !receipt.success {
                    return Err(KeeperError::TransactionFailed {
                        signature: hash.to_string(),
                        reason: format!("reverted in block {}", receipt.block_number),
                    });
                }
                return Ok(Some(receipt));
            }
            debug!(%hash, attempt, "receipt pending");
            tokio::time::sleep(Duration::from_millis(self.config.receipt_poll_ms)).await;
        }
        Ok(None)
    }

    /// One monitor cycle. `signer` may be omitted only for a dry run.
    pub async fn run(
        &self,
        now: i64,
        force: bool,
        dry_run: bool,
        signer: Option<&EvmSigner>,
    ) -> Result<MonitorReport> {
        let mut report = MonitorReport::new();
        report.enter(MonitorState::CheckStaleness);
        let staleness = self
            .check_staleness(now, self.config.staleness_threshold_secs, force)
            .await?;
        report.staleness = Some(staleness);
        if !staleness.stale {
            report.enter(MonitorState::Fresh);
            return Ok(report);
        }
        report.enter(MonitorState::Stale);

        report.enter(MonitorState::BuildPushOperation);
        let op = self
            .build_push(&staleness.mirrored, now, signer.map(EvmSigner::address))
            .await?;
        report.source_index = Some(op.source.value);
        report.quote = Some(op.quote.to_string());
        if dry_run {
            info!(
                to = %op.call.to,
                value = %op.call.value,
                data = %hex::encode(&op.call.data),
                "dry run: index push not sent"
            );
            report.enter(MonitorState::DryRunStopped);
            return Ok(report);
        }
        let signer = signer.ok_or_else(|| KeeperError::Signer("no EVM key for index push".to_string()))?;

        let hash = self.submit_push(&op, signer).await?;
        report.transaction_hash = Some(hash.clone());
        report.enter(MonitorState::Submitted);
        match self.await_receipt(&hash).await {
            Ok(Some(receipt)) => {
                report.block_number = Some(receipt.block_number);
                report.enter(MonitorState::Confirmed);
            }
            Ok(None) => {
                warn!(%hash, attempts = self.config.receipt_attempts, "no receipt");
                report.enter(MonitorState::Failed);
            }
            Err(e) => {
                warn!(%hash, error = %e, "index push failed");
                report.enter(MonitorState::Failed);
            }
        }
        Ok(report)
    }
}

/// A JSON-RPC error from a preflight is the contract rejecting the call.
fn reverted(e: KeeperError) -> KeeperError {
    match e {
        KeeperError::Network(RpcError::Rpc { code, message }) => {
            KeeperError::Simulation(format!("eth preflight rejected ({code}): {message}"))
        }
        other => other,
    }
}
