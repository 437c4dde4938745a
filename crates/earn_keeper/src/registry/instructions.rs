//! Instruction builders for the earn program (Anchor encoding: 8-byte discriminator,
//! then borsh arguments).

use crate::error::DecodeError;
use crate::merkle::{ExclusionProof, MerkleProof, ProofElement};
use crate::registry::layout::{prefixed_discriminator, ProgramAddresses};
use crate::tx::{programs, AccountMeta, Instruction, Pubkey};
use borsh::BorshSerialize;

pub const ADD_REGISTRAR_EARNER: &str = "add_registrar_earner";
pub const REMOVE_REGISTRAR_EARNER: &str = "remove_registrar_earner";
pub const CLAIM_FOR: &str = "claim_for";

/// sha256("global:<name>")[..8].
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    prefixed_discriminator("global", name)
}

fn encode<A: BorshSerialize>(name: &str, args: &A) -> std::io::Result<Vec<u8>> {
    let mut data = instruction_discriminator(name).to_vec();
    data.extend(borsh::to_vec(args)?);
    Ok(data)
}

#[derive(BorshSerialize)]
struct AddArgs<'a> {
    user: [u8; 32],
    proof: &'a [ProofElement],
}

#[derive(BorshSerialize)]
struct RemoveArgs {
    proofs: Vec<Vec<ProofElement>>,
    neighbors: Vec<[u8; 32]>,
}

#[derive(BorshSerialize)]
struct ClaimArgs {
    snapshot_balance: u64,
}

/// Register `user` with an inclusion proof against the current earner root.
pub fn add_registrar_earner(
    addrs: &ProgramAddresses,
    signer: &Pubkey,
    earner_account: &Pubkey,
    user_token_account: &Pubkey,
    proof: &MerkleProof,
) -> Result<Instruction, DecodeError> {
    let args = AddArgs {
        user: proof.leaf.to_bytes(),
        proof: &proof.path,
    };
    Ok(Instruction {
        program_id: addrs.program_id,
        accounts: vec![
            AccountMeta::new(*signer, true),
            AccountMeta::new_readonly(addrs.global, false),
            AccountMeta::new_readonly(*user_token_account, false),
            AccountMeta::new(*earner_account, false),
            AccountMeta::new_readonly(programs::system(), false),
        ],
        data: encode(ADD_REGISTRAR_EARNER, &args)?,
    })
}

/// Neighbor proofs in (lower, upper) order. A set boundary is sent as the all-zero
/// key with an empty path.
fn neighbor_args(proof: &ExclusionProof) -> RemoveArgs {
    let side = |p: &Option<MerkleProof>| match p {
        Some(p) => (p.path.clone(), p.leaf.to_bytes()),
        None => (Vec::new(), [0u8; 32]),
    };
    let (lo_path, lo_key) = side(&proof.lower);
    let (hi_path, hi_key) = side(&proof.upper);
    RemoveArgs {
        proofs: vec![lo_path, hi_path],
        neighbors: vec![lo_key, hi_key],
    }
}

/// Deregister an earner with an exclusion proof against the current earner root.
pub fn remove_registrar_earner(
    addrs: &ProgramAddresses,
    signer: &Pubkey,
    earner_account: &Pubkey,
    user_token_account: &Pubkey,
    proof: &ExclusionProof,
) -> Result<Instruction, DecodeError> {
    Ok(Instruction {
        program_id: addrs.program_id,
        accounts: vec![
            AccountMeta::new(*signer, true),
            AccountMeta::new_readonly(addrs.global, false),
            AccountMeta::new(*earner_account, false),
            AccountMeta::new_readonly(*user_token_account, false),
        ],
        data: encode(REMOVE_REGISTRAR_EARNER, &neighbor_args(proof))?,
    })
}

/// Accounts needed to claim for one earner.
#[derive(Clone, Copy, Debug)]
pub struct ClaimAccounts {
    pub earn_authority: Pubkey,
    pub mint: Pubkey,
    pub token_program: Pubkey,
    pub user_token_account: Pubkey,
    pub earner_account: Pubkey,
}

pub fn claim_for(
    addrs: &ProgramAddresses,
    accounts: &ClaimAccounts,
    snapshot_balance: u64,
) -> Result<Instruction, DecodeError> {
    Ok(Instruction {
        program_id: addrs.program_id,
        accounts: vec![
            AccountMeta::new(accounts.earn_authority, true),
            AccountMeta::new(addrs.global, false),
            AccountMeta::new(accounts.mint, false),
            AccountMeta::new_readonly(addrs.token_authority, false),
            AccountMeta::new(accounts.user_token_account, false),
            AccountMeta::new(accounts.earner_account, false),
            AccountMeta::new_readonly(accounts.token_program, false),
        ],
        data: encode(CLAIM_FOR, &ClaimArgs { snapshot_balance })?,
    })
}
