//! Hubroute CLI - submit hub-routed stablecoin transfers and follow them to settlement

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::types::{Address, H256};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

use hubroute::action::{ActionKind, Destination, TransferAction};
use hubroute::chain::ChainManager;
use hubroute::config::Settings;
use hubroute::metrics::MetricsServer;
use hubroute::pool::{read_pool, read_wallet_balances};
use hubroute::settlement::{CctxIndexer, SettlementHandle, SettlementRecord, TransferOutcome};
use hubroute::tx::{load_wallet, EvmSigner, GasEstimator, NonceManager};
use hubroute::TransferOrchestrator;

#[derive(Parser)]
#[command(name = "hubroute", version, about = "Hub-routed stablecoin transfers")]
struct Cli {
    /// Configuration file (defaults to $HUBROUTE_CONFIG, then config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a transfer and follow it until it settles
    Transfer(TransferArgs),
    /// Follow an already submitted deposit or withdrawal by its origin tx
    Track(TrackArgs),
    /// Show the hub pool's virtual price and reserves
    Pool,
    /// Show a wallet's LP and pool token balances on the hub
    Balances(BalancesArgs),
}

#[derive(Args)]
struct BalancesArgs {
    /// Wallet to inspect (defaults to the configured signing wallet)
    #[arg(long)]
    address: Option<String>,
}

#[derive(Args)]
struct TransferArgs {
    #[arg(long)]
    kind: ActionKind,
    /// Chain the transfer starts on (name or id)
    #[arg(long)]
    chain: String,
    /// Token spent
    #[arg(long)]
    token: String,
    /// Target token (convert, redeem) or target chain (deposit, withdraw)
    #[arg(long)]
    to: String,
    /// Human-readable amount, e.g. 12.5
    #[arg(long)]
    amount: String,
    #[arg(long)]
    recipient: String,
    #[arg(long)]
    slippage_bps: Option<u32>,
    /// Share of a withdrawal swapped for destination gas
    #[arg(long)]
    gas_reserve_bps: Option<u32>,
    /// Stop following after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Args)]
struct TrackArgs {
    /// Origin transaction hash
    #[arg(long)]
    tx: String,
    #[arg(long)]
    kind: ActionKind,
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();

    info!("Starting hubroute v{}", env!("CARGO_PKG_VERSION"));

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    info!(
        "Loaded configuration: hub {} and {} external chains",
        settings.hub.name,
        settings.enabled_chains().len()
    );

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let indexer = Arc::new(CctxIndexer::new(&settings.indexer)?);
    let orchestrator = TransferOrchestrator::from_settings(&settings, indexer);

    let result = match cli.command {
        Command::Transfer(args) => run_transfer(&settings, &orchestrator, args).await.map(|o| report(&o)),
        Command::Track(args) => run_track(&orchestrator, args).await.map(|o| report(&o)),
        Command::Pool => show_pool(&settings).await,
        Command::Balances(args) => show_balances(&settings, args).await,
    };

    if let Some(h) = metrics_handle {
        h.abort();
    }

    result
}

async fn run_track(orchestrator: &TransferOrchestrator, args: TrackArgs) -> Result<TransferOutcome> {
    let origin_tx: H256 = args
        .tx
        .parse()
        .with_context(|| format!("Invalid transaction hash: {}", args.tx))?;
    let handle = orchestrator.track(origin_tx, args.kind)?;
    Ok(follow(handle, args.deadline_secs.map(Duration::from_secs)).await)
}

async fn show_pool(settings: &Settings) -> Result<ExitCode> {
    let chain_manager = ChainManager::new(settings)?;
    let provider = chain_manager.get_provider(settings.hub.chain_id)?;

    let snapshot = read_pool(&*provider, &settings.hub)
        .await
        .context("Failed to read pool state")?;
    info!(
        "Pool {:?} holds {} at virtual price {}",
        snapshot.pool, snapshot.total_liquidity, snapshot.virtual_price
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(ExitCode::SUCCESS)
}

async fn show_balances(settings: &Settings, args: BalancesArgs) -> Result<ExitCode> {
    let owner: Address = match args.address {
        Some(address) => address
            .parse()
            .with_context(|| format!("Invalid address: {}", address))?,
        None => ethers::signers::Signer::address(&load_wallet(&settings.wallet.private_key_env)?),
    };

    let chain_manager = ChainManager::new(settings)?;
    let provider = chain_manager.get_provider(settings.hub.chain_id)?;

    let balances = read_wallet_balances(&*provider, &settings.hub, owner).await;
    let failed = balances.iter().filter(|b| b.error.is_some()).count();
    if failed > 0 {
        warn!("{} of {} balances could not be read", failed, balances.len());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "owner": owner,
            "balances": balances,
        }))?
    );

    Ok(ExitCode::SUCCESS)
}

async fn run_transfer(
    settings: &Settings,
    orchestrator: &TransferOrchestrator,
    args: TransferArgs,
) -> Result<TransferOutcome> {
    let origin_chain = settings
        .resolve_chain(&args.chain)
        .with_context(|| format!("Unknown chain: {}", args.chain))?;

    let destination = match args.kind {
        ActionKind::Convert | ActionKind::Redeem => Destination::Token(args.to.clone()),
        ActionKind::Deposit | ActionKind::Withdraw => Destination::Chain(
            settings
                .resolve_chain(&args.to)
                .with_context(|| format!("Unknown chain: {}", args.to))?,
        ),
    };

    let gas_reserve_bps = match args.kind {
        ActionKind::Withdraw => Some(
            args.gas_reserve_bps
                .unwrap_or(settings.orchestrator.default_gas_reserve_bps),
        ),
        _ => args.gas_reserve_bps,
    };

    let action = TransferAction {
        kind: args.kind,
        origin_chain,
        source_token: args.token,
        destination: Some(destination),
        amount: args.amount,
        recipient: args.recipient,
        slippage_bps: args
            .slippage_bps
            .unwrap_or(settings.orchestrator.default_slippage_bps),
        gas_reserve_bps,
    };
    let action = action.validate()?;

    let chain_manager = ChainManager::new(settings)?;
    for (chain_id, healthy) in chain_manager.health_check().await {
        if !healthy {
            warn!("Chain {} health check failed", chain_id);
        }
    }
    debug!("Configured chains: {:?}", chain_manager.connected_chains());

    let provider = chain_manager.get_provider(origin_chain)?;
    let watcher = chain_manager.get_inclusion_watcher(origin_chain)?;
    let wallet = load_wallet(&settings.wallet.private_key_env)?;
    let nonce_manager = Arc::new(NonceManager::new(ethers::signers::Signer::address(&wallet)));
    let signer = EvmSigner::new(
        wallet,
        provider,
        watcher,
        nonce_manager,
        GasEstimator::new(settings.orchestrator.gas_limit_buffer_percent),
    );

    let execution = match orchestrator.execute(&action, &signer).await {
        Ok(execution) => execution,
        Err(e) => {
            if e.funds_moved() {
                error!("Transfer outcome unknown, funds may have moved: {}", e);
            } else {
                error!("Transfer not submitted: {}", e);
            }
            return Err(e.into());
        }
    };

    if let Some(approval_tx) = execution.approval_tx {
        info!("Approval transaction: {:?}", approval_tx);
    }
    info!(
        "Submitted {} as {:?}: amount {} base units, expected {}, minimum {}",
        execution.kind,
        execution.origin_tx,
        execution.bounds.base_units,
        execution.bounds.expected_output,
        execution.bounds.min_output
    );

    Ok(follow(execution.handle, args.deadline_secs.map(Duration::from_secs)).await)
}

/// Print updates until the transfer finishes, the deadline passes or the user interrupts
async fn follow(mut handle: SettlementHandle, deadline: Option<Duration>) -> TransferOutcome {
    let deadline = async move {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            update = handle.next_update() => match update {
                Some(record) => print_record(&record),
                None => break,
            },
            _ = &mut shutdown => {
                warn!("Shutdown signal received, cancelling tracking (the transfer itself continues)");
                handle.cancel();
                break;
            }
            _ = &mut deadline => {
                warn!("Deadline reached, cancelling tracking (the transfer itself continues)");
                handle.cancel();
                break;
            }
        }
    }

    handle.wait().await
}

fn print_record(record: &SettlementRecord) {
    info!(
        "{:?}: {} (indexer: {}, hub tx: {}, destination tx: {})",
        record.origin_tx_id,
        record.state,
        record.indexer_status.as_deref().unwrap_or("-"),
        record.hub_tx_id.as_deref().unwrap_or("-"),
        record.destination_tx_id.as_deref().unwrap_or("-")
    );
}

fn report(outcome: &TransferOutcome) -> ExitCode {
    let summary = serde_json::json!({
        "outcome": outcome.label(),
        "record": outcome.record(),
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to render record: {}", e),
    }

    match outcome {
        TransferOutcome::Settled(_) => {
            info!("Transfer settled");
            ExitCode::SUCCESS
        }
        TransferOutcome::Failed(record) => {
            error!(
                "Transfer failed: {}",
                record.failure_reason.as_deref().unwrap_or("unknown reason")
            );
            ExitCode::from(1)
        }
        TransferOutcome::Unknown(record) => {
            warn!(
                "Outcome unknown; re-query later with: hubroute track --tx {:?} --kind <deposit|withdraw>",
                record.origin_tx_id
            );
            ExitCode::from(2)
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hubroute=debug,hyper=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
