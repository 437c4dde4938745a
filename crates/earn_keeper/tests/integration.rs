//! Integration tests over saved fixtures and in-memory chain fakes.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use earn_keeper::chain::{
    AccountFilter, BalanceHistory, ConfirmationLevel, HistoryQuery, RecentBlockhash,
    SignatureStatus, SimulationOutcome, SolanaRpc,
};
use earn_keeper::compute::{time_weighted_balance, BalanceUpdate};
use earn_keeper::config::KeeperConfig;
use earn_keeper::context::CycleContext;
use earn_keeper::distribute::{ClaimEngine, ClaimsConfig};
use earn_keeper::merkle::MerkleTree;
use earn_keeper::registry::events::RewardsClaim;
use earn_keeper::registry::{
    account_discriminator, EarnerAccount, GlobalState, MirroredEarner, ProgramAddresses,
    RegistryOperation, SetReconciler,
};
use earn_keeper::tx::{programs, Blockhash, FeeParams, Keypair, Pubkey, Signer, TransactionPipeline};
use earn_keeper::verify::{read_manifest, verify_manifest_hash, write_manifest, DistributionManifest};
use earn_keeper::KeeperError;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

fn load_fixture<T: serde::de::DeserializeOwned>(path: &str) -> T {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../testdata");
    let full = root.join(path);
    let s =
        std::fs::read_to_string(&full).unwrap_or_else(|e| panic!("read {}: {}", full.display(), e));
    serde_json::from_str(&s).unwrap_or_else(|e| panic!("parse {}: {}", path, e))
}

#[derive(serde::Deserialize)]
struct EarnerSets {
    program_id: String,
    mint: String,
    source: Vec<String>,
    mirrored: Vec<String>,
}

fn keys(raw: &[String]) -> Vec<Pubkey> {
    raw.iter().map(|s| Pubkey::from_str(s).unwrap()).collect()
}

fn mirrored_earner(user: Pubkey, token_account: Pubkey, last_index: u64, last_ts: u64) -> MirroredEarner {
    MirroredEarner {
        earner_account: Pubkey::new_from_array([user.to_bytes()[0].wrapping_add(100); 32]),
        account: EarnerAccount {
            user,
            last_claim_index: last_index,
            last_claim_timestamp: last_ts,
            bump: 254,
            user_token_account: token_account,
            earn_manager: None,
            recipient_token_account: None,
        },
    }
}

fn reconciler_from_fixture() -> (SetReconciler, Vec<MirroredEarner>, EarnerSets) {
    let sets: EarnerSets = load_fixture("earner_sets.json");
    let addrs = ProgramAddresses::derive(Pubkey::from_str(&sets.program_id).unwrap()).unwrap();
    let mint = Pubkey::from_str(&sets.mint).unwrap();
    let reconciler = SetReconciler::new(keys(&sets.source), addrs, mint, programs::token_2022());
    let mirrored = keys(&sets.mirrored)
        .into_iter()
        .map(|u| mirrored_earner(u, Pubkey::new_from_array([9; 32]), 0, 0))
        .collect();
    (reconciler, mirrored, sets)
}

#[test]
fn integration_history_page_gives_time_weighted_balance() {
    let mut page: Vec<BalanceUpdate> = load_fixture("balance_history_page.json");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].timestamp, 1_700_064_800);
    page.reverse();
    let twb = time_weighted_balance(3_000, 1_700_000_000, 1_700_086_400, &page).unwrap();
    assert_eq!(twb, 2_000);
}

#[test]
fn integration_newest_first_page_is_rejected_unsorted() {
    let page: Vec<BalanceUpdate> = load_fixture("balance_history_page.json");
    assert!(time_weighted_balance(3_000, 1_700_000_000, 1_700_086_400, &page).is_err());
}

#[test]
fn integration_missing_source_earner_is_added_with_proof() {
    let (reconciler, mirrored, sets) = reconciler_from_fixture();
    let ops = reconciler.plan_additions(&mirrored);
    assert_eq!(ops.len(), 1);
    let missing = Pubkey::from_str(&sets.source[1]).unwrap();
    match &ops[0] {
        RegistryOperation::AddEarner { user, proof, .. } => {
            assert_eq!(*user, missing);
            assert!(proof.verify());
            assert_eq!(proof.root, reconciler.root());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(reconciler.plan_removals(&mirrored).is_empty());
}

#[test]
fn integration_stale_mirrored_earner_is_removed_between_neighbors() {
    let sets: EarnerSets = load_fixture("earner_sets.json");
    let addrs = ProgramAddresses::derive(Pubkey::from_str(&sets.program_id).unwrap()).unwrap();
    let mint = Pubkey::from_str(&sets.mint).unwrap();
    // Roles swapped: the three-key list is on chain, the two-key list is the source.
    let reconciler = SetReconciler::new(keys(&sets.mirrored), addrs, mint, programs::token_2022());
    let on_chain: Vec<MirroredEarner> = keys(&sets.source)
        .into_iter()
        .map(|u| mirrored_earner(u, Pubkey::new_from_array([9; 32]), 0, 0))
        .collect();
    let ops = reconciler.plan_removals(&on_chain);
    assert_eq!(ops.len(), 1);
    let mut sorted = keys(&sets.mirrored);
    sorted.sort();
    match &ops[0] {
        RegistryOperation::RemoveEarner { user, proof, .. } => {
            assert_eq!(*user, Pubkey::from_str(&sets.source[1]).unwrap());
            assert!(proof.verify());
            assert_eq!(proof.neighbors(), (Some(sorted[0]), Some(sorted[1])));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn integration_applied_plan_is_idempotent() {
    let (reconciler, mut mirrored, _) = reconciler_from_fixture();
    for op in reconciler.plan_additions(&mirrored) {
        if let RegistryOperation::AddEarner {
            user,
            user_token_account,
            ..
        } = op
        {
            mirrored.push(mirrored_earner(user, user_token_account, 0, 0));
        }
    }
    assert!(reconciler.plan_additions(&mirrored).is_empty());
    assert!(reconciler.plan_removals(&mirrored).is_empty());
}

#[test]
fn integration_sample_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/earn_keeper.json");
    let config = KeeperConfig::load_from_path(&path).unwrap();
    let sets: EarnerSets = load_fixture("earner_sets.json");
    assert_eq!(config.program_id().unwrap().to_string(), sets.program_id);
    assert_eq!(config.expected_mint().unwrap().unwrap().to_string(), sets.mint);
    assert_eq!(config.push_params().unwrap().chain_id, Some(11_155_111));
    assert_eq!(config.monitor.staleness_threshold_secs, 86_400);
}

/// Solana node holding fixed accounts; every simulation reports `claim_logs`.
struct ChainFake {
    accounts: HashMap<Pubkey, Vec<u8>>,
    earners: Vec<(Pubkey, Vec<u8>)>,
    balances: HashMap<Pubkey, u64>,
    claim_logs: Vec<String>,
    sent: Mutex<usize>,
}

#[async_trait]
impl SolanaRpc for ChainFake {
    async fn account_data(&self, address: &Pubkey) -> earn_keeper::Result<Option<Vec<u8>>> {
        Ok(self.accounts.get(address).cloned())
    }
    async fn program_accounts(
        &self,
        _program_id: &Pubkey,
        _filters: &[AccountFilter],
    ) -> earn_keeper::Result<Vec<(Pubkey, Vec<u8>)>> {
        Ok(self.earners.clone())
    }
    async fn token_balance(&self, token_account: &Pubkey) -> earn_keeper::Result<u64> {
        Ok(self.balances.get(token_account).copied().unwrap_or_default())
    }
    async fn latest_blockhash(&self) -> earn_keeper::Result<RecentBlockhash> {
        Ok(RecentBlockhash {
            blockhash: Blockhash::new_from_array([1; 32]),
            last_valid_block_height: 1_000,
        })
    }
    async fn simulate(&self, _tx: &[u8]) -> earn_keeper::Result<SimulationOutcome> {
        Ok(SimulationOutcome {
            err: None,
            logs: self.claim_logs.clone(),
            units_consumed: Some(50_000),
        })
    }
    async fn send(&self, _tx: &[u8]) -> earn_keeper::Result<String> {
        let mut sent = self.sent.lock().unwrap();
        *sent += 1;
        Ok(format!("sig{sent}"))
    }
    async fn signature_status(&self, _signature: &str) -> earn_keeper::Result<Option<SignatureStatus>> {
        Ok(Some(SignatureStatus {
            confirmation: Some(ConfirmationLevel::Confirmed),
            err: None,
        }))
    }
    async fn block_height(&self) -> earn_keeper::Result<u64> {
        Ok(900)
    }
}

struct FixtureHistory {
    by_account: HashMap<Pubkey, Vec<BalanceUpdate>>,
}

#[async_trait]
impl BalanceHistory for FixtureHistory {
    async fn balance_updates(&self, query: &HistoryQuery) -> earn_keeper::Result<Vec<BalanceUpdate>> {
        Ok(self.by_account.get(&query.account).cloned().unwrap_or_default())
    }
}

fn anchor_bytes<T: borsh::BorshSerialize>(name: &str, value: &T) -> Vec<u8> {
    let mut out = account_discriminator(name).to_vec();
    out.extend(borsh::to_vec(value).unwrap());
    out
}

fn claim_log(token_account: Pubkey, amount: u64) -> String {
    let mut raw = RewardsClaim::discriminator().to_vec();
    raw.extend(
        borsh::to_vec(&RewardsClaim {
            token_account,
            recipient_token_account: token_account,
            amount,
            ts: 1_700_086_400,
            index: 1_050_000_000_000,
            fee: 0,
        })
        .unwrap(),
    );
    format!("Program data: {}", BASE64.encode(raw))
}

const CYCLE_START: u64 = 1_700_000_000;
const NOW: i64 = 1_700_086_400;

fn distribution_chain(simulated: [u64; 2]) -> (ChainFake, FixtureHistory, Pubkey) {
    let sets: EarnerSets = load_fixture("earner_sets.json");
    let program_id = Pubkey::from_str(&sets.program_id).unwrap();
    let addrs = ProgramAddresses::derive(program_id).unwrap();
    let global = GlobalState {
        admin: Pubkey::new_from_array([1; 32]),
        earn_authority: Pubkey::new_from_array([2; 32]),
        portal_authority: Pubkey::new_from_array([3; 32]),
        mint: Pubkey::from_str(&sets.mint).unwrap(),
        index: 1_050_000_000_000,
        timestamp: CYCLE_START,
        claim_cooldown: 0,
        max_supply: 100_000_000,
        max_yield: 5_000,
        distributed: 1_200,
        claim_complete: false,
        earner_merkle_root: MerkleTree::build(keys(&sets.source)).root(),
        earn_manager_merkle_root: [0; 32],
        bump: 255,
    };
    // Token account [1; 32] is the account of the saved history page.
    let first = mirrored_earner(Pubkey::new_from_array([11; 32]), Pubkey::new_from_array([1; 32]), 1_000_000_000_000, CYCLE_START);
    let second = mirrored_earner(Pubkey::new_from_array([12; 32]), Pubkey::new_from_array([2; 32]), 1_000_000_000_000, CYCLE_START);

    let mut page: Vec<BalanceUpdate> = load_fixture("balance_history_page.json");
    page.reverse();
    let chain = ChainFake {
        accounts: HashMap::from([(addrs.global, anchor_bytes(GlobalState::NAME, &global))]),
        earners: [&first, &second]
            .iter()
            .map(|e| (e.earner_account, anchor_bytes(EarnerAccount::NAME, &e.account)))
            .collect(),
        balances: HashMap::from([
            (first.account.user_token_account, 3_000),
            (second.account.user_token_account, 10_000),
        ]),
        claim_logs: vec![
            claim_log(first.account.user_token_account, simulated[0]),
            claim_log(second.account.user_token_account, simulated[1]),
        ],
        sent: Mutex::new(0),
    };
    let history = FixtureHistory {
        by_account: HashMap::from([(first.account.user_token_account, page)]),
    };
    (chain, history, program_id)
}

fn fees() -> FeeParams {
    FeeParams {
        confirm_poll_ms: 0,
        ..FeeParams::default()
    }
}

#[tokio::test]
async fn integration_distribution_cycle_end_to_end() {
    let (chain, history, program_id) = distribution_chain([100, 500]);
    let ctx = CycleContext::load(&chain, program_id, programs::token_2022(), NOW)
        .await
        .unwrap();
    let engine = ClaimEngine::load(&chain, &history, &ctx, ClaimsConfig::default());
    let earners = engine.list_earners().await.unwrap();
    assert_eq!(earners.len(), 2);

    let claims = engine.build_claims(&earners).await.unwrap();
    let amounts: Vec<u64> = claims.iter().map(|c| c.amount).collect();
    // 2000 and 10000 time-weighted, times a 5% index delta.
    assert_eq!(amounts, vec![100, 500]);
    assert_eq!(claims[0].updates, 2);

    let signer = Keypair::new_from_array([2u8; 32]);
    let authority = signer.pubkey();
    let pipeline = TransactionPipeline::new(&chain, fees());
    let ceiling = engine.ceiling();
    assert_eq!(ceiling, 3_800);
    let batch = engine
        .validate_batch(&pipeline, claims, ceiling, &authority)
        .await
        .unwrap();
    assert_eq!(batch.simulated_total, 600);
    assert_eq!(*chain.sent.lock().unwrap(), 0);

    let dir = tempfile::tempdir().unwrap();
    let tree = MerkleTree::build(earners.iter().map(|e| e.account.user));
    let manifest = DistributionManifest::new(&ctx, &tree, &batch);
    assert_eq!(manifest.claimed_total(), 600);
    let path = dir.path().join("manifest.json");
    let hash = write_manifest(&manifest, &path).unwrap();
    let back = read_manifest(&path).unwrap();
    assert!(verify_manifest_hash(&back, &hash).unwrap().matches);

    let sent = engine
        .submit_batch(&pipeline, batch, &signer, true)
        .await
        .unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(*chain.sent.lock().unwrap(), 1);
}

#[tokio::test]
async fn integration_over_distribution_never_sends() {
    let (chain, history, program_id) = distribution_chain([100, 3_701]);
    let ctx = CycleContext::load(&chain, program_id, programs::token_2022(), NOW)
        .await
        .unwrap();
    let engine = ClaimEngine::load(&chain, &history, &ctx, ClaimsConfig::default());
    let earners = engine.list_earners().await.unwrap();
    let claims = engine.build_claims(&earners).await.unwrap();
    let pipeline = TransactionPipeline::new(&chain, fees());
    let err = engine
        .validate_batch(&pipeline, claims, engine.ceiling(), &Pubkey::new_from_array([2; 32]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KeeperError::OverDistribution {
            simulated: 3_801,
            ceiling: 3_800
        }
    ));
    assert_eq!(*chain.sent.lock().unwrap(), 0);
}
