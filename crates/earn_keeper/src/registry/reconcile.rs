//! Earner-set reconciliation between the EVM source list and the on-chain registry.

use crate::chain::{AccountFilter, SolanaRpc};
use crate::context::CycleContext;
use crate::error::{DecodeError, Result};
use crate::merkle::{ExclusionProof, Hash, MerkleProof, MerkleTree, ProofError};
use crate::registry::instructions;
use crate::registry::layout::{account_discriminator, EarnerAccount, ProgramAddresses};
use crate::tx::{
    associated_token_address, Instruction, Keypair, Pubkey, Signer, SubmitOutcome,
    TransactionPipeline,
};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// An earner as currently registered on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirroredEarner {
    pub earner_account: Pubkey,
    pub account: EarnerAccount,
}

/// Every earner account of the program, matched by discriminator alone since the
/// encoded length varies with the optional fields.
pub async fn fetch_earners(
    rpc: &dyn SolanaRpc,
    addrs: &ProgramAddresses,
) -> Result<Vec<MirroredEarner>> {
    let filters = [AccountFilter::Memcmp {
        offset: 0,
        bytes: account_discriminator(EarnerAccount::NAME).to_vec(),
    }];
    let raw = rpc.program_accounts(&addrs.program_id, &filters).await?;
    raw.into_iter()
        .map(|(key, data)| {
            Ok(MirroredEarner {
                earner_account: key,
                account: EarnerAccount::decode(&key, &data)?,
            })
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryOperation {
    AddEarner {
        #[serde(with = "crate::tx::serde_pubkey")]
        user: Pubkey,
        #[serde(with = "crate::tx::serde_pubkey")]
        user_token_account: Pubkey,
        #[serde(with = "crate::tx::serde_pubkey")]
        earner_account: Pubkey,
        proof: MerkleProof,
    },
    RemoveEarner {
        #[serde(with = "crate::tx::serde_pubkey")]
        user: Pubkey,
        #[serde(with = "crate::tx::serde_pubkey")]
        user_token_account: Pubkey,
        #[serde(with = "crate::tx::serde_pubkey")]
        earner_account: Pubkey,
        proof: ExclusionProof,
    },
}

impl RegistryOperation {
    pub fn user(&self) -> &Pubkey {
        match self {
            Self::AddEarner { user, .. } | Self::RemoveEarner { user, .. } => user,
        }
    }

    pub fn instruction(&self, addrs: &ProgramAddresses, signer: &Pubkey) -> Result<Instruction> {
        let ix = match self {
            Self::AddEarner {
                user_token_account,
                earner_account,
                proof,
                ..
            } => instructions::add_registrar_earner(
                addrs,
                signer,
                earner_account,
                user_token_account,
                proof,
            ),
            Self::RemoveEarner {
                user_token_account,
                earner_account,
                proof,
                ..
            } => instructions::remove_registrar_earner(
                addrs,
                signer,
                earner_account,
                user_token_account,
                proof,
            ),
        }?;
        Ok(ix)
    }
}

/// Plans registry changes that make the mirrored set equal the source set.
pub struct SetReconciler {
    source: MerkleTree,
    addrs: ProgramAddresses,
    mint: Pubkey,
    token_program: Pubkey,
}

impl SetReconciler {
    pub fn new(
        source: impl IntoIterator<Item = Pubkey>,
        addrs: ProgramAddresses,
        mint: Pubkey,
        token_program: Pubkey,
    ) -> Self {
        Self {
            source: MerkleTree::build(source),
            addrs,
            mint,
            token_program,
        }
    }

    pub fn from_context(source: impl IntoIterator<Item = Pubkey>, ctx: &CycleContext) -> Self {
        Self::new(source, ctx.addresses, ctx.mint(), ctx.token_program)
    }

    pub fn root(&self) -> Hash {
        self.source.root()
    }

    pub fn source(&self) -> &MerkleTree {
        &self.source
    }

    /// True when the registry already stores the source root. On drift the portal has not
    /// propagated the new list yet and proofs will be rejected.
    pub fn check_root(&self, on_chain_root: &Hash) -> bool {
        let matches = *on_chain_root == self.root();
        if !matches {
            warn!(
                source_root = %hex::encode(self.root()),
                on_chain_root = %hex::encode(on_chain_root),
                "earner root drift"
            );
        }
        matches
    }

    /// One add per source address missing from the mirrored set, each with an inclusion
    /// proof against the source root.
    pub fn plan_additions(&self, mirrored: &[MirroredEarner]) -> Vec<RegistryOperation> {
        let present: BTreeSet<Pubkey> = mirrored.iter().map(|m| m.account.user).collect();
        let mut ops = Vec::new();
        for user in self.source.leaves().iter().filter(|u| !present.contains(u)) {
            match self.addition(user) {
                Ok(op) => ops.push(op),
                Err(e) => warn!(%user, error = %e, "skipping addition"),
            }
        }
        info!(count = ops.len(), "planned additions");
        ops
    }

    fn addition(&self, user: &Pubkey) -> Result<RegistryOperation> {
        let proof = self.source.inclusion_proof(user)?;
        if !proof.verify() {
            return Err(ProofError::Invalid(*user).into());
        }
        let user_token_account = associated_token_address(user, &self.mint, &self.token_program);
        let earner_account = self.earner_pda(&user_token_account)?;
        Ok(RegistryOperation::AddEarner {
            user: *user,
            user_token_account,
            earner_account,
            proof,
        })
    }

    /// One remove per mirrored earner whose user is absent from the source, each with an
    /// exclusion proof naming its sorted neighbors.
    pub fn plan_removals(&self, mirrored: &[MirroredEarner]) -> Vec<RegistryOperation> {
        let mut ops = Vec::new();
        for earner in mirrored.iter().filter(|m| !self.source.contains(&m.account.user)) {
            let user = earner.account.user;
            let proof = match self
                .source
                .exclusion_proof(&user)
                .and_then(|p| if p.verify() { Ok(p) } else { Err(ProofError::Invalid(user)) })
            {
                Ok(p) => p,
                Err(e) => {
                    warn!(%user, error = %e, "skipping removal");
                    continue;
                }
            };
            ops.push(RegistryOperation::RemoveEarner {
                user,
                user_token_account: earner.account.user_token_account,
                earner_account: earner.earner_account,
                proof,
            });
        }
        info!(count = ops.len(), "planned removals");
        ops
    }

    fn earner_pda(&self, user_token_account: &Pubkey) -> Result<Pubkey> {
        self.addrs.earner(user_token_account).ok_or_else(|| {
            DecodeError::Account {
                account: user_token_account.to_string(),
                reason: "no earner address".to_string(),
            }
            .into()
        })
    }
}

/// Outcome of applying a plan.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ApplyReport {
    pub operations: usize,
    pub transactions: usize,
    pub submitted: Vec<SubmitOutcome>,
    pub dry_run: bool,
}

/// Chunk, simulate every chunk, then submit in order. Any simulation failure aborts
/// before the first send; a later send failure leaves earlier chunks committed.
pub async fn apply_operations(
    pipeline: &TransactionPipeline<'_>,
    addrs: &ProgramAddresses,
    ops: &[RegistryOperation],
    signer: &Keypair,
    dry_run: bool,
    wait: bool,
) -> Result<ApplyReport> {
    let payer = signer.pubkey();
    let ixs = ops
        .iter()
        .map(|op| op.instruction(addrs, &payer))
        .collect::<Result<Vec<Instruction>>>()?;
    let groups = pipeline.chunk(ixs, &payer)?;
    let mut prepared = Vec::with_capacity(groups.len());
    for group in &groups {
        prepared.push(pipeline.prepare(group, &payer).await?);
    }
    let mut report = ApplyReport {
        operations: ops.len(),
        transactions: prepared.len(),
        submitted: Vec::new(),
        dry_run,
    };
    if dry_run {
        info!(transactions = report.transactions, "dry run: registry plan simulated");
        return Ok(report);
    }
    for tx in prepared {
        report.submitted.push(pipeline.submit(tx, &[signer], wait).await?);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::fake::FakeSolana;
    use crate::registry::layout::tests::earner_bytes;
    use crate::tx::{programs, FeeParams};

    fn key(n: u8) -> Pubkey {
        Pubkey::new_from_array([n; 32])
    }

    fn addrs() -> ProgramAddresses {
        ProgramAddresses::derive(key(77)).unwrap()
    }

    fn mirrored(users: &[Pubkey]) -> Vec<MirroredEarner> {
        users
            .iter()
            .map(|u| MirroredEarner {
                earner_account: Pubkey::new_from_array([u.to_bytes()[0].wrapping_add(100); 32]),
                account: EarnerAccount {
                    user: *u,
                    last_claim_index: 1_000_000_000_000,
                    last_claim_timestamp: 1_000,
                    bump: 255,
                    user_token_account: Pubkey::new_from_array([u.to_bytes()[0].wrapping_add(50); 32]),
                    earn_manager: None,
                    recipient_token_account: None,
                },
            })
            .collect()
    }

    fn reconciler(source: &[Pubkey]) -> SetReconciler {
        SetReconciler::new(source.iter().copied(), addrs(), key(4), programs::token_2022())
    }

    #[test]
    fn adds_missing_with_inclusion_proof() {
        let (a, b, c) = (key(1), key(2), key(3));
        let r = reconciler(&[a, b, c]);
        let ops = r.plan_additions(&mirrored(&[a, c]));
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            RegistryOperation::AddEarner {
                user,
                proof,
                user_token_account,
                ..
            } => {
                assert_eq!(*user, b);
                assert!(proof.verify());
                assert_eq!(proof.root, MerkleTree::build([a, b, c]).root());
                assert_eq!(
                    *user_token_account,
                    associated_token_address(&b, &key(4), &programs::token_2022())
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(r.plan_removals(&mirrored(&[a, c])).is_empty());
    }

    #[test]
    fn removes_extra_with_neighbors() {
        let (a, b, c) = (key(1), key(2), key(3));
        let r = reconciler(&[a, c]);
        let ops = r.plan_removals(&mirrored(&[a, b, c]));
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            RegistryOperation::RemoveEarner { user, proof, .. } => {
                assert_eq!(*user, b);
                assert_eq!(proof.neighbors(), (Some(a), Some(c)));
                assert!(proof.verify());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(r.plan_additions(&mirrored(&[a, b, c])).is_empty());
    }

    #[test]
    fn converged_sets_plan_nothing() {
        let set = [key(1), key(2), key(3)];
        let r = reconciler(&set);
        let first = r.plan_additions(&mirrored(&[key(1)]));
        assert_eq!(first.len(), 2);
        // once applied, the mirrored set equals the source
        assert!(r.plan_additions(&mirrored(&set)).is_empty());
        assert!(r.plan_removals(&mirrored(&set)).is_empty());
    }

    #[test]
    fn root_drift_detected() {
        let r = reconciler(&[key(1), key(2)]);
        assert!(r.check_root(&MerkleTree::build([key(2), key(1)]).root()));
        assert!(!r.check_root(&[0u8; 32]));
    }

    #[tokio::test]
    async fn fetch_filters_earner_accounts() {
        let rpc = FakeSolana::default();
        let m = mirrored(&[key(1)]);
        rpc.add_program_account(m[0].earner_account, earner_bytes(&m[0].account));
        rpc.add_program_account(key(99), vec![0u8; 218]);
        let got = fetch_earners(&rpc, &addrs()).await.unwrap();
        assert_eq!(got, m);
    }

    #[tokio::test]
    async fn fetch_lists_earners_of_every_encoded_length() {
        let rpc = FakeSolana::default();
        let mut m = mirrored(&[key(1), key(2)]);
        m[1].account.earn_manager = Some(key(60));
        m[1].account.recipient_token_account = Some(key(61));
        let mut short = account_discriminator(EarnerAccount::NAME).to_vec();
        short.extend(borsh::to_vec(&m[0].account).unwrap());
        rpc.add_program_account(m[0].earner_account, short);
        rpc.add_program_account(m[1].earner_account, earner_bytes(&m[1].account));
        let got = fetch_earners(&rpc, &addrs()).await.unwrap();
        assert_eq!(got, m);
        assert_eq!(earner_bytes(&m[1].account).len(), EarnerAccount::LEN);
    }

    #[tokio::test]
    async fn dry_run_simulates_without_sending() {
        let rpc = FakeSolana::default();
        let pipeline = TransactionPipeline::new(&rpc, FeeParams::default());
        let r = reconciler(&[key(1), key(2), key(3)]);
        let ops = r.plan_additions(&[]);
        let signer = Keypair::new_from_array([5u8; 32]);
        let report = apply_operations(&pipeline, &addrs(), &ops, &signer, true, false)
            .await
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.operations, 3);
        assert_eq!(rpc.simulated_count(), report.transactions);
        assert_eq!(rpc.sent_count(), 0);
    }
}
