//! earn-keeper CLI: reconcile, distribute, push-index, verify.

use clap::{Parser, Subcommand};
use earn_keeper::chain::{
    Cache, EarnerSource, EvmClient, EvmSigner, HistoryClient, SolanaClient,
};
use earn_keeper::config::{KeeperConfig, CONFIG_ENV};
use earn_keeper::context::CycleContext;
use earn_keeper::distribute::{CeilingPolicy, ClaimEngine};
use earn_keeper::index::IndexMonitor;
use earn_keeper::merkle::MerkleTree;
use earn_keeper::registry::{apply_operations, fetch_earners, MirroredEarner, SetReconciler};
use earn_keeper::tx::{Keypair, Signer, TransactionPipeline};
use earn_keeper::verify::{read_manifest, verify_manifest_hash, write_manifest};
use earn_keeper::KeeperError;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let cli = Cli::parse();
    let command = match cli.command {
        Command::Verify(args) => return run_verify(args),
        other => other,
    };
    let env_path = std::env::var(CONFIG_ENV).ok();
    let path = KeeperConfig::resolve_path(cli.config.as_deref(), env_path.as_deref());
    let config = KeeperConfig::load_from_path(&path)?;
    info!(config = %path.display(), "configuration loaded");
    let rt = tokio::runtime::Runtime::new()?;
    match command {
        Command::Reconcile(args) => rt.block_on(run_reconcile(&config, args)),
        Command::Distribute(args) => rt.block_on(run_distribute(&config, args)),
        Command::PushIndex(args) => rt.block_on(run_push_index(&config, args)),
        Command::Verify(args) => run_verify(args),
    }
}

#[derive(Parser)]
#[command(name = "earn-keeper")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "Earner registry reconciliation, yield distribution and index push keeper")]
struct Cli {
    /// Config file (default: $EARN_KEEPER_CONFIG, then ./config/earn_keeper.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mirror the EVM earner list into the earn program.
    Reconcile(ReconcileArgs),
    /// Build, validate and submit this cycle's yield claims.
    Distribute(DistributeArgs),
    /// Push the accrual index when the Solana copy is stale.
    PushIndex(PushIndexArgs),
    /// Verify a distribution manifest's reproducibility hash.
    Verify(VerifyArgs),
}

#[derive(Parser)]
struct ReconcileArgs {
    /// Simulate the plan without submitting.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    no_wait: bool,
    /// Earn authority keypair (JSON byte array); overrides the config.
    #[arg(long)]
    keypair: Option<PathBuf>,
}

#[derive(Parser)]
struct DistributeArgs {
    #[arg(long)]
    dry_run: bool,
    /// Fixed ceiling, replacing the configured policy.
    #[arg(long)]
    ceiling: Option<u64>,
    #[arg(long)]
    no_wait: bool,
    #[arg(long)]
    keypair: Option<PathBuf>,
    #[arg(long, default_value = "./reports")]
    reports_dir: PathBuf,
}

#[derive(Parser)]
struct PushIndexArgs {
    /// Staleness threshold in seconds; overrides the config.
    #[arg(long)]
    threshold: Option<i64>,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Parser)]
struct VerifyArgs {
    #[arg(long)]
    manifest: PathBuf,
    /// Expected hash file (default: <manifest>.sha256).
    #[arg(long)]
    hash: Option<PathBuf>,
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Solana CLI keypair file: a JSON array of 64 bytes.
fn load_keypair(path: &Path) -> Result<Keypair, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let bytes: Vec<u8> = serde_json::from_str(&content)?;
    if bytes.len() != 64 {
        return Err(KeeperError::Signer("keypair file must hold 64 bytes".to_string()).into());
    }
    Ok(Keypair::try_from(bytes.as_slice())
        .map_err(|e| KeeperError::Signer(format!("keypair: {e}")))?)
}

fn authority_key(
    config: &KeeperConfig,
    explicit: Option<&Path>,
) -> Result<Keypair, Box<dyn std::error::Error>> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| config.solana.keypair_path.as_ref().map(PathBuf::from))
        .ok_or_else(|| KeeperError::Signer("no keypair given (--keypair or solana.keypair_path)".to_string()))?;
    load_keypair(&path)
}

fn solana_client(config: &KeeperConfig) -> Result<SolanaClient, Box<dyn std::error::Error>> {
    Ok(SolanaClient::new(
        &config.solana.rpc_url,
        &config.solana.commitment,
        config.rpc.clone(),
    )?)
}

async fn load_context(
    config: &KeeperConfig,
    solana: &SolanaClient,
) -> Result<CycleContext, Box<dyn std::error::Error>> {
    let ctx = CycleContext::load(solana, config.program_id()?, config.token_program()?, now()).await?;
    if let Some(expected) = config.expected_mint()? {
        if expected != ctx.mint() {
            return Err(format!("global mint {} does not match configured {expected}", ctx.mint()).into());
        }
    }
    Ok(ctx)
}

async fn run_reconcile(
    config: &KeeperConfig,
    args: ReconcileArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let solana = solana_client(config)?;
    let evm = EvmClient::new(&config.evm.rpc_url, config.rpc.clone())?;
    let ctx = load_context(config, &solana).await?;
    let signer = authority_key(config, args.keypair.as_deref())?;

    let source = EarnerSource::new(&evm, config.earner_source()?).earners().await?;
    let reconciler = SetReconciler::from_context(source, &ctx);
    reconciler.check_root(&ctx.global.earner_merkle_root);
    let mirrored = fetch_earners(&solana, &ctx.addresses).await?;

    let mut ops = reconciler.plan_additions(&mirrored);
    ops.extend(reconciler.plan_removals(&mirrored));
    info!(
        source = reconciler.source().len(),
        mirrored = mirrored.len(),
        operations = ops.len(),
        root = %hex::encode(reconciler.root()),
        "reconcile plan"
    );
    if ops.is_empty() {
        println!("{{\"operations\":0}}");
        return Ok(());
    }
    let pipeline = TransactionPipeline::new(&solana, config.fees.clone());
    let report = apply_operations(
        &pipeline,
        &ctx.addresses,
        &ops,
        &signer,
        args.dry_run,
        !args.no_wait,
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Seconds since the oldest outstanding claim among `earners`.
fn elapsed_since_oldest_claim(earners: &[MirroredEarner], now: i64) -> u64 {
    earners
        .iter()
        .map(|e| e.account.last_claim_timestamp)
        .min()
        .map(|oldest| u64::try_from(now).unwrap_or_default().saturating_sub(oldest))
        .unwrap_or_default()
}

async fn run_distribute(
    config: &KeeperConfig,
    args: DistributeArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let solana = solana_client(config)?;
    let ctx = load_context(config, &solana).await?;
    let signer = authority_key(config, args.keypair.as_deref())?;
    let authority = signer.pubkey();
    if authority != ctx.global.earn_authority {
        warn!(%authority, expected = %ctx.global.earn_authority, "signer is not the earn authority");
    }

    let cache = config
        .history
        .cache_path
        .as_deref()
        .map(Cache::open)
        .transpose()?;
    let history = HistoryClient::new(config.history.clone(), config.rpc.clone(), cache, ctx.now)?;

    let mut claims_config = config.claims.clone();
    let earners = fetch_earners(&solana, &ctx.addresses).await?;
    claims_config.ceiling = match (args.ceiling, &config.claims.ceiling) {
        (Some(amount), _) => CeilingPolicy::Fixed { amount },
        (None, CeilingPolicy::EarnerRate { supply, .. }) => {
            let evm = EvmClient::new(&config.evm.rpc_url, config.rpc.clone())?;
            let rate = EarnerSource::new(&evm, config.earner_source()?).earner_rate().await?;
            CeilingPolicy::EarnerRate {
                rate_bps: rate,
                supply: *supply,
                elapsed_secs: elapsed_since_oldest_claim(&earners, ctx.now),
            }
        }
        (None, policy) => policy.clone(),
    };
    let engine = ClaimEngine::load(&solana, &history, &ctx, claims_config);
    let ceiling = engine.ceiling();
    let claims = engine.build_claims(&earners).await?;
    if claims.is_empty() {
        info!("nothing to distribute");
        return Ok(());
    }

    let pipeline = TransactionPipeline::new(&solana, config.fees.clone());
    let batch = engine
        .validate_batch(&pipeline, claims, ceiling, &authority)
        .await?;
    let tree = MerkleTree::build(earners.iter().map(|e| e.account.user));
    let manifest = earn_keeper::DistributionManifest::new(&ctx, &tree, &batch);
    let manifest_path = args
        .reports_dir
        .join(format!("distribution-{}-{}.json", ctx.global.index, ctx.now));
    let hash = write_manifest(&manifest, &manifest_path)?;
    info!(manifest = %manifest_path.display(), %hash, "manifest written");

    if args.dry_run {
        info!(
            claims = batch.operations.len(),
            simulated_total = batch.simulated_total,
            ceiling,
            "dry run: distribution not submitted"
        );
        println!("{hash}");
        return Ok(());
    }
    let sent = engine
        .submit_batch(&pipeline, batch, &signer, !args.no_wait)
        .await?;
    println!("{}", serde_json::to_string_pretty(&sent)?);
    Ok(())
}

async fn run_push_index(
    config: &KeeperConfig,
    args: PushIndexArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let solana = solana_client(config)?;
    let evm = EvmClient::new(&config.evm.rpc_url, config.rpc.clone())?;
    let program_id = config.program_id()?;
    let addresses = earn_keeper::registry::ProgramAddresses::derive(program_id)?;

    let signer = match std::env::var(&config.evm.private_key_env) {
        Ok(hex_key) => Some(EvmSigner::from_hex(&hex_key)?),
        Err(_) if args.dry_run => None,
        Err(_) => {
            return Err(KeeperError::Signer(format!(
                "{} is not set",
                config.evm.private_key_env
            ))
            .into())
        }
    };
    let mut monitor_config = config.monitor.clone();
    if let Some(threshold) = args.threshold {
        monitor_config.staleness_threshold_secs = threshold;
    }
    let monitor = IndexMonitor::new(
        &solana,
        &evm,
        addresses.global,
        config.earner_source()?,
        config.portal()?,
        config.push_params()?,
        monitor_config,
    );
    let report = monitor
        .run(now(), args.force, args.dry_run, signer.as_ref())
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.state == earn_keeper::MonitorState::Failed {
        return Err("index push did not confirm".into());
    }
    Ok(())
}

fn run_verify(args: VerifyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = read_manifest(&args.manifest)?;
    let hash_path = args.hash.unwrap_or_else(|| {
        let mut p = args.manifest.clone().into_os_string();
        p.push(".sha256");
        PathBuf::from(p)
    });
    let expected = std::fs::read_to_string(&hash_path)?;
    let result = verify_manifest_hash(&manifest, &expected)?;
    if result.matches {
        println!("OK\t{}", result.manifest_hash);
    } else {
        eprintln!(
            "MISMATCH\tcomputed={}\texpected={:?}",
            result.manifest_hash, result.expected_hash
        );
        std::process::exit(1);
    }
    Ok(())
}
