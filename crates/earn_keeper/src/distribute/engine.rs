//! Claim computation, batch validation and submission.

use crate::chain::{BalanceHistory, HistoryQuery, SolanaRpc};
use crate::compute::time_weighted_balance;
use crate::context::CycleContext;
use crate::distribute::ceiling::CeilingPolicy;
use crate::error::{KeeperError, Result};
use crate::index::{AccrualIndex, IndexChain};
use crate::registry::instructions::{claim_for, ClaimAccounts};
use crate::registry::{fetch_earners, rewards_claims, MirroredEarner};
use crate::tx::{
    Instruction, Keypair, PreparedTransaction, Pubkey, SubmitOutcome, TransactionPipeline,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Fixed-point scale of the accrual index.
    pub index_base: u64,
    /// Claims below this amount are not worth a transaction.
    pub dust_threshold: u64,
    pub ceiling: CeilingPolicy,
    /// Most history updates accepted per earner; an earner over it is skipped.
    pub history_limit: Option<usize>,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            index_base: 1_000_000_000_000,
            dust_threshold: 1,
            ceiling: CeilingPolicy::default(),
            history_limit: None,
        }
    }
}

/// One earner's claim for the current cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOperation {
    #[serde(with = "crate::tx::serde_pubkey")]
    pub user: Pubkey,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub earner_account: Pubkey,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub user_token_account: Pubkey,
    /// Time-weighted balance over the accrual window; sent as the snapshot balance.
    pub snapshot_balance: u64,
    pub amount: u64,
    pub window_start: i64,
    pub window_end: i64,
    pub last_claim_index: u64,
    pub updates: usize,
}

/// Claims that passed simulation under their ceiling, with their prepared transactions.
#[derive(Debug)]
pub struct DistributionBatch {
    pub operations: Vec<ClaimOperation>,
    pub ceiling: u64,
    pub simulated_total: u64,
    pub transactions: Vec<PreparedTransaction>,
}

/// Over-distribution check. Equal to the ceiling is allowed.
pub fn check_ceiling(simulated: u128, ceiling: u64) -> Result<u64> {
    if simulated > u128::from(ceiling) {
        return Err(KeeperError::OverDistribution {
            simulated: u64::try_from(simulated).unwrap_or(u64::MAX),
            ceiling,
        });
    }
    Ok(simulated as u64)
}

pub struct ClaimEngine<'a> {
    rpc: &'a dyn SolanaRpc,
    history: &'a dyn BalanceHistory,
    ctx: &'a CycleContext,
    config: ClaimsConfig,
}

impl<'a> ClaimEngine<'a> {
    /// Bind the engine to one cycle; the current index comes from the loaded global state.
    pub fn load(
        rpc: &'a dyn SolanaRpc,
        history: &'a dyn BalanceHistory,
        ctx: &'a CycleContext,
        config: ClaimsConfig,
    ) -> Self {
        Self {
            rpc,
            history,
            ctx,
            config,
        }
    }

    pub fn current_index(&self) -> AccrualIndex {
        AccrualIndex {
            value: self.ctx.global.index,
            last_update: self.ctx.global.timestamp as i64,
            chain: IndexChain::Solana,
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.config.ceiling.ceiling(&self.ctx.global)
    }

    pub async fn list_earners(&self) -> Result<Vec<MirroredEarner>> {
        let earners = fetch_earners(self.rpc, &self.ctx.addresses).await?;
        info!(count = earners.len(), "registered earners");
        Ok(earners)
    }

    /// Claim for one earner, or `None` when nothing is owed or the amount is dust.
    pub async fn build_claim(&self, earner: &MirroredEarner) -> Result<Option<ClaimOperation>> {
        let acct = &earner.account;
        let index = self.current_index();
        if acct.last_claim_index >= index.value {
            debug!(user = %acct.user, "already claimed at current index");
            return Ok(None);
        }
        let window_start = acct.last_claim_timestamp as i64;
        let window_end = self.ctx.now;
        if window_end <= window_start {
            debug!(user = %acct.user, "empty accrual window");
            return Ok(None);
        }

        let balance = self.rpc.token_balance(&acct.user_token_account).await?;
        let updates = self
            .history
            .balance_updates(&HistoryQuery {
                account: acct.user_token_account,
                asset: self.ctx.mint(),
                from: Some(window_start),
                to: Some(window_end),
                limit: self.config.history_limit,
            })
            .await?;
        let snapshot_balance = time_weighted_balance(balance, window_start, window_end, &updates)?;

        let delta = u128::from(index.delta_since(acct.last_claim_index));
        let amount = u128::from(snapshot_balance) * delta / u128::from(self.config.index_base.max(1));
        let amount = u64::try_from(amount).unwrap_or(u64::MAX);
        if amount < self.config.dust_threshold {
            debug!(user = %acct.user, amount, "below dust threshold");
            return Ok(None);
        }
        Ok(Some(ClaimOperation {
            user: acct.user,
            earner_account: earner.earner_account,
            user_token_account: acct.user_token_account,
            snapshot_balance,
            amount,
            window_start,
            window_end,
            last_claim_index: acct.last_claim_index,
            updates: updates.len(),
        }))
    }

    /// Claims for every earner. Bad input for one earner skips that earner only.
    pub async fn build_claims(&self, earners: &[MirroredEarner]) -> Result<Vec<ClaimOperation>> {
        let mut ops = Vec::new();
        for earner in earners {
            match self.build_claim(earner).await {
                Ok(Some(op)) => ops.push(op),
                Ok(None) => {}
                Err(e) if !e.is_batch_fatal() => {
                    warn!(user = %earner.account.user, error = %e, "skipping earner");
                }
                Err(e) => return Err(e),
            }
        }
        let total: u128 = ops.iter().map(|o| u128::from(o.amount)).sum();
        info!(claims = ops.len(), total = %total, "claims built");
        Ok(ops)
    }

    fn instructions(&self, ops: &[ClaimOperation], authority: &Pubkey) -> Result<Vec<Instruction>> {
        ops.iter()
            .map(|op| {
                let ix = claim_for(
                    &self.ctx.addresses,
                    &ClaimAccounts {
                        earn_authority: *authority,
                        mint: self.ctx.mint(),
                        token_program: self.ctx.token_program,
                        user_token_account: op.user_token_account,
                        earner_account: op.earner_account,
                    },
                    op.snapshot_balance,
                )?;
                Ok(ix)
            })
            .collect()
    }

    /// Simulate every claim and bound the batch total by `ceiling`. Nothing is sent.
    ///
    /// Every claim must show exactly one `RewardsClaim` event in its simulation; a missing,
    /// extra or undecodable event fails the batch. The bounded total is the larger of the
    /// simulated and computed sums.
    pub async fn validate_batch(
        &self,
        pipeline: &TransactionPipeline<'_>,
        operations: Vec<ClaimOperation>,
        ceiling: u64,
        authority: &Pubkey,
    ) -> Result<DistributionBatch> {
        let groups = pipeline.chunk(self.instructions(&operations, authority)?, authority)?;
        let mut pending: BTreeMap<Pubkey, usize> = BTreeMap::new();
        for op in &operations {
            *pending.entry(op.user_token_account).or_default() += 1;
        }
        let mut transactions = Vec::with_capacity(groups.len());
        let mut simulated: u128 = 0;
        for group in &groups {
            let prepared = pipeline.prepare(group, authority).await?;
            for ev in rewards_claims(&prepared.simulation.logs) {
                match pending.get_mut(&ev.token_account).filter(|n| **n > 0) {
                    Some(n) => *n -= 1,
                    None => {
                        return Err(KeeperError::Simulation(format!(
                            "unexpected claim event for {}",
                            ev.token_account
                        )))
                    }
                }
                simulated += u128::from(ev.amount);
            }
            transactions.push(prepared);
        }
        let missing: usize = pending.values().sum();
        if missing > 0 {
            warn!(missing, claims = operations.len(), "claim events missing from simulation");
            return Err(KeeperError::Simulation(format!(
                "{missing} of {} claims produced no decodable claim event",
                operations.len()
            )));
        }
        let computed: u128 = operations.iter().map(|o| u128::from(o.amount)).sum();
        if computed != simulated {
            warn!(computed = %computed, simulated = %simulated, "simulated total differs from computed");
        }
        let simulated_total = check_ceiling(simulated.max(computed), ceiling)?;
        info!(simulated_total, ceiling, transactions = transactions.len(), "batch validated");
        Ok(DistributionBatch {
            operations,
            ceiling,
            simulated_total,
            transactions,
        })
    }

    /// Sign and send a validated batch in order. Failures are surfaced, not retried;
    /// transactions sent before a failure stay committed.
    pub async fn submit_batch(
        &self,
        pipeline: &TransactionPipeline<'_>,
        batch: DistributionBatch,
        signer: &Keypair,
        wait: bool,
    ) -> Result<Vec<SubmitOutcome>> {
        let total = batch.transactions.len();
        let mut sent = Vec::with_capacity(total);
        for tx in batch.transactions {
            match pipeline.submit(tx, &[signer], wait).await {
                Ok(out) => sent.push(out),
                Err(e) => {
                    warn!(committed = sent.len(), total, error = %e, "distribution stopped");
                    return Err(e);
                }
            }
        }
        Ok(sent)
    }
}
