//! In-memory [`SolanaRpc`] for unit tests.

use crate::chain::rpc::RpcError;
use crate::chain::solana::{
    AccountFilter, RecentBlockhash, SignatureStatus, SimulationOutcome, SolanaRpc,
};
use crate::error::Result;
use crate::tx::{Blockhash, Pubkey};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const LAST_VALID: u64 = 1_000;

pub(crate) struct FakeSolana {
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    program_accounts: Mutex<Vec<(Pubkey, Vec<u8>)>>,
    balances: Mutex<HashMap<Pubkey, u64>>,
    simulations: Mutex<VecDeque<SimulationOutcome>>,
    simulated: Mutex<Vec<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    send_failure: Mutex<Option<(i64, String)>>,
    statuses: Mutex<VecDeque<Option<SignatureStatus>>>,
    block_height: Mutex<u64>,
}

impl Default for FakeSolana {
    fn default() -> Self {
        Self {
            accounts: Mutex::default(),
            program_accounts: Mutex::default(),
            balances: Mutex::default(),
            simulations: Mutex::default(),
            simulated: Mutex::default(),
            sent: Mutex::default(),
            send_failure: Mutex::default(),
            statuses: Mutex::default(),
            block_height: Mutex::new(LAST_VALID - 100),
        }
    }
}

impl FakeSolana {
    pub fn set_account(&self, key: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(key, data);
    }

    pub fn add_program_account(&self, key: Pubkey, data: Vec<u8>) {
        self.program_accounts.lock().unwrap().push((key, data));
    }

    pub fn set_balance(&self, key: Pubkey, amount: u64) {
        self.balances.lock().unwrap().insert(key, amount);
    }

    /// Queued outcomes are consumed in order; once empty, simulations succeed with 20k units.
    pub fn push_simulation(&self, outcome: SimulationOutcome) {
        self.simulations.lock().unwrap().push_back(outcome);
    }

    pub fn push_status(&self, status: Option<SignatureStatus>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn fail_send(&self, code: i64, message: &str) {
        *self.send_failure.lock().unwrap() = Some((code, message.to_string()));
    }

    pub fn set_block_height(&self, height: u64) {
        *self.block_height.lock().unwrap() = height;
    }

    pub fn last_valid_block_height(&self) -> u64 {
        LAST_VALID
    }

    pub fn simulated_count(&self) -> usize {
        self.simulated.lock().unwrap().len()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl SolanaRpc for FakeSolana {
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        Ok(self.accounts.lock().unwrap().get(address).cloned())
    }

    async fn program_accounts(
        &self,
        _program_id: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>> {
        let all = self.program_accounts.lock().unwrap().clone();
        Ok(all
            .into_iter()
            .filter(|(_, data)| {
                filters.iter().all(|f| match f {
                    AccountFilter::DataSize(n) => data.len() as u64 == *n,
                    AccountFilter::Memcmp { offset, bytes } => {
                        data.get(*offset..*offset + bytes.len()) == Some(bytes.as_slice())
                    }
                })
            })
            .collect())
    }

    async fn token_balance(&self, token_account: &Pubkey) -> Result<u64> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(token_account)
            .copied()
            .unwrap_or_default())
    }

    async fn latest_blockhash(&self) -> Result<RecentBlockhash> {
        Ok(RecentBlockhash {
            blockhash: Blockhash::new_from_array([42u8; 32]),
            last_valid_block_height: LAST_VALID,
        })
    }

    async fn simulate(&self, tx: &[u8]) -> Result<SimulationOutcome> {
        self.simulated.lock().unwrap().push(tx.to_vec());
        Ok(self
            .simulations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SimulationOutcome {
                err: None,
                logs: vec![],
                units_consumed: Some(20_000),
            }))
    }

    async fn send(&self, tx: &[u8]) -> Result<String> {
        if let Some((code, message)) = self.send_failure.lock().unwrap().clone() {
            return Err(RpcError::Rpc { code, message }.into());
        }
        self.sent.lock().unwrap().push(tx.to_vec());
        Ok(bs58::encode(&tx[1..65]).into_string())
    }

    async fn signature_status(&self, _signature: &str) -> Result<Option<SignatureStatus>> {
        Ok(self.statuses.lock().unwrap().pop_front().flatten())
    }

    async fn block_height(&self) -> Result<u64> {
        Ok(*self.block_height.lock().unwrap())
    }
}
