//! Simulate-then-submit transaction pipeline.
//!
//! [`TransactionPipeline::prepare`] is the pure half: blockhash, compile, simulate,
//! compute budget. [`TransactionPipeline::submit`] is the effectful half: sign, send,
//! and optionally wait for confirmation or blockhash expiry.

use crate::chain::{ConfirmationLevel, RpcError, SimulationOutcome, SolanaRpc};
use crate::error::{KeeperError, Result};
use crate::tx::message::{self, MessageError, PACKET_DATA_SIZE};
use serde::{Deserialize, Serialize};
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hard per-transaction compute ceiling on the network.
pub const MAX_COMPUTE_UNITS: u32 = 1_400_000;

/// JSON-RPC code returned when `sendTransaction` preflight simulation fails.
const PREFLIGHT_FAILURE: i64 = -32002;

/// Fee and compute-budget parameters attached to every transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeParams {
    /// Priority fee in micro-lamports per compute unit.
    pub compute_unit_price: u64,
    /// Headroom added to simulated compute, in percent.
    pub margin_pct: u64,
    pub max_compute_units: u32,
    /// Upper bound on operations packed into one transaction.
    pub max_instructions_per_tx: usize,
    pub confirm_poll_ms: u64,
}

impl Default for FeeParams {
    fn default() -> Self {
        Self {
            compute_unit_price: 1_000,
            margin_pct: 10,
            max_compute_units: MAX_COMPUTE_UNITS,
            max_instructions_per_tx: 10,
            confirm_poll_ms: 2_000,
        }
    }
}

impl FeeParams {
    /// Simulated units plus margin, capped at the configured maximum.
    pub fn limit_for(&self, units_consumed: u64) -> u32 {
        let padded = u128::from(units_consumed) * u128::from(100 + self.margin_pct) / 100;
        padded.min(u128::from(self.max_compute_units)) as u32
    }
}

pub fn compute_unit_limit(units: u32) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_limit(units)
}

pub fn compute_unit_price(micro_lamports: u64) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_price(micro_lamports)
}

/// An unsigned, simulated transaction ready to sign.
#[derive(Clone, Debug)]
pub struct PreparedTransaction {
    pub transaction: Transaction,
    pub last_valid_block_height: u64,
    pub compute_units: u32,
    /// Outcome of the measuring simulation; program logs carry emitted events.
    pub simulation: SimulationOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub signature: String,
    pub confirmed: bool,
}

pub struct TransactionPipeline<'a> {
    rpc: &'a dyn SolanaRpc,
    fees: FeeParams,
}

impl<'a> TransactionPipeline<'a> {
    pub fn new(rpc: &'a dyn SolanaRpc, fees: FeeParams) -> Self {
        Self { rpc, fees }
    }

    pub fn fees(&self) -> &FeeParams {
        &self.fees
    }

    fn with_budget(&self, units: u32, instructions: &[Instruction]) -> Vec<Instruction> {
        let mut all = Vec::with_capacity(instructions.len() + 2);
        all.push(compute_unit_limit(units));
        all.push(compute_unit_price(self.fees.compute_unit_price));
        all.extend_from_slice(instructions);
        all
    }

    /// Build, simulate and size one transaction. Nothing is signed or sent.
    pub async fn prepare(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
    ) -> Result<PreparedTransaction> {
        let recent = self.rpc.latest_blockhash().await?;
        let measuring = message::compile(
            &self.with_budget(self.fees.max_compute_units, instructions),
            payer,
            &recent.blockhash,
        );
        let simulation = self.rpc.simulate(&message::encode(&measuring)?).await?;
        if let Some(err) = &simulation.err {
            return Err(KeeperError::Simulation(describe_failure(err, &simulation.logs)));
        }
        let consumed = simulation
            .units_consumed
            .unwrap_or(u64::from(self.fees.max_compute_units));
        let compute_units = self.fees.limit_for(consumed);
        debug!(consumed, compute_units, "simulated");

        let transaction = message::compile(
            &self.with_budget(compute_units, instructions),
            payer,
            &recent.blockhash,
        );
        message::encode(&transaction)?;
        Ok(PreparedTransaction {
            transaction,
            last_valid_block_height: recent.last_valid_block_height,
            compute_units,
            simulation,
        })
    }

    /// Sign and send. With `wait`, poll until confirmed, failed, or past the
    /// blockhash's last valid block height.
    pub async fn submit(
        &self,
        prepared: PreparedTransaction,
        signers: &[&Keypair],
        wait: bool,
    ) -> Result<SubmitOutcome> {
        let mut tx = prepared.transaction;
        let blockhash = tx.message.recent_blockhash;
        tx.try_sign(signers, blockhash)
            .map_err(|e| MessageError::Sign(e.to_string()))?;
        let signature = match self.rpc.send(&message::encode(&tx)?).await {
            Ok(sig) => sig,
            Err(KeeperError::Network(RpcError::Rpc { code, message })) if code == PREFLIGHT_FAILURE => {
                return Err(KeeperError::Simulation(message));
            }
            Err(e) => return Err(e),
        };
        info!(%signature, units = prepared.compute_units, "transaction sent");
        if !wait {
            return Ok(SubmitOutcome {
                signature,
                confirmed: false,
            });
        }
        self.confirm(&signature, prepared.last_valid_block_height)
            .await?;
        Ok(SubmitOutcome {
            signature,
            confirmed: true,
        })
    }

    async fn confirm(&self, signature: &str, last_valid_block_height: u64) -> Result<()> {
        loop {
            if let Some(status) = self.rpc.signature_status(signature).await? {
                if let Some(err) = status.err {
                    return Err(KeeperError::TransactionFailed {
                        signature: signature.to_string(),
                        reason: err.to_string(),
                    });
                }
                if status
                    .confirmation
                    .is_some_and(|c| c >= ConfirmationLevel::Confirmed)
                {
                    info!(%signature, "transaction confirmed");
                    return Ok(());
                }
            }
            let height = self.rpc.block_height().await?;
            if height > last_valid_block_height {
                warn!(%signature, height, last_valid_block_height, "blockhash expired");
                return Err(KeeperError::TransactionExpired {
                    signature: signature.to_string(),
                    last_valid_block_height,
                });
            }
            tokio::time::sleep(Duration::from_millis(self.fees.confirm_poll_ms)).await;
        }
    }

    pub async fn build_and_send(
        &self,
        instructions: &[Instruction],
        payer: &Keypair,
        wait: bool,
    ) -> Result<SubmitOutcome> {
        let prepared = self.prepare(instructions, &payer.pubkey()).await?;
        self.submit(prepared, &[payer], wait).await
    }

    /// Greedily pack instructions, in order, into groups whose transaction (budget
    /// directives and signatures included) fits one packet.
    pub fn chunk(
        &self,
        instructions: Vec<Instruction>,
        payer: &Pubkey,
    ) -> Result<Vec<Vec<Instruction>>> {
        let mut groups: Vec<Vec<Instruction>> = Vec::new();
        let mut current: Vec<Instruction> = Vec::new();
        for ix in instructions {
            current.push(ix);
            let over_count = current.len() > self.fees.max_instructions_per_tx.max(1);
            if over_count || !self.fits(&current, payer)? {
                let Some(ix) = current.pop() else { continue };
                if current.is_empty() {
                    let size = self.sized(&[ix], payer)?;
                    return Err(MessageError::TooLarge(size).into());
                }
                groups.push(std::mem::take(&mut current));
                current.push(ix);
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        Ok(groups)
    }

    fn sized(&self, instructions: &[Instruction], payer: &Pubkey) -> Result<usize> {
        let tx = message::compile(
            &self.with_budget(self.fees.max_compute_units, instructions),
            payer,
            &Default::default(),
        );
        Ok(message::serialized_size(&tx)?)
    }

    fn fits(&self, instructions: &[Instruction], payer: &Pubkey) -> Result<bool> {
        Ok(self.sized(instructions, payer)? <= PACKET_DATA_SIZE)
    }
}

fn describe_failure(err: &serde_json::Value, logs: &[String]) -> String {
    let tail: Vec<&str> = logs.iter().rev().take(3).rev().map(String::as_str).collect();
    if tail.is_empty() {
        err.to_string()
    } else {
        format!("{err} ({})", tail.join(" | "))
    }
}
