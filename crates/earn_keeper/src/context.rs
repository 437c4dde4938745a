//! Per-cycle view of the earn program's state.

use crate::chain::SolanaRpc;
use crate::error::{DecodeError, Result};
use crate::registry::{GlobalState, ProgramAddresses};
use crate::tx::Pubkey;
use tracing::info;

/// Everything a reconciliation, distribution or staleness check needs to know about
/// the program at the start of one cycle. Built once and passed explicitly.
#[derive(Clone, Debug)]
pub struct CycleContext {
    pub addresses: ProgramAddresses,
    pub global: GlobalState,
    pub token_program: Pubkey,
    /// Unix seconds the cycle treats as "now".
    pub now: i64,
}

impl CycleContext {
    pub async fn load(
        rpc: &dyn SolanaRpc,
        program_id: Pubkey,
        token_program: Pubkey,
        now: i64,
    ) -> Result<Self> {
        let addresses = ProgramAddresses::derive(program_id)?;
        let data = rpc
            .account_data(&addresses.global)
            .await?
            .ok_or_else(|| DecodeError::Account {
                account: addresses.global.to_string(),
                reason: "global account does not exist".to_string(),
            })?;
        let global = GlobalState::decode(&addresses.global, &data)?;
        info!(
            program = %program_id,
            index = global.index,
            index_ts = global.timestamp,
            "cycle context loaded"
        );
        Ok(Self {
            addresses,
            global,
            token_program,
            now,
        })
    }

    pub fn mint(&self) -> Pubkey {
        self.global.mint
    }
}
