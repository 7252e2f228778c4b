//! `evm-sync` process entrypoint: parses the CLI surface, loads
//! configuration, and dispatches to `run` (the default), `migrate`, or
//! `gap-repair`.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sqlx::{Pool, Postgres};
use tokio_util::sync::CancellationToken;

use evm_sync::config::{self, AppConfig};
use evm_sync::db::{self, lock::{lock_name_for_chain, AdvisoryLock}};
use evm_sync::error::Error;
use evm_sync::health::{self, HealthState};
use evm_sync::indexer::gap_repair;
use evm_sync::indexer::poll_loop::PollLoop;
use evm_sync::indexer::sync_engine::SyncEngine;
use evm_sync::rpc::{RpcPool, RpcPoolConfig};
use evm_sync::telemetry::{self, TelemetryConfig};

#[derive(Parser)]
#[command(name = "evm-sync", about = "EVM block/transfer sync engine")]
struct Cli {
    /// Overrides the default `config.toml` lookup with an explicit path.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the poll loop and the health/metrics server, holding the
    /// advisory lock for the process lifetime. Default if no subcommand
    /// is given.
    Run,
    /// Applies pending SQL migrations and exits.
    Migrate,
    /// One-shot: fills pending gaps and exits (out-of-band of the poll
    /// loop's interleaved repair).
    GapRepair,
}

/// Distinguishes the two non-error exit paths: a lock-contention exit is
/// code 0 ("another instance is syncing"), every other error is fatal and
/// exits 1.
enum MainOutcome {
    LockHeld,
    Fatal(Error),
}

impl From<Error> for MainOutcome {
    fn from(e: Error) -> Self {
        if e.is_lock_contention() {
            MainOutcome::LockHeld
        } else {
            MainOutcome::Fatal(e)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init_tracing(TelemetryConfig::default()) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
    match runtime.block_on(dispatch(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(MainOutcome::LockHeld) => {
            tracing::info!("another instance is syncing");
            ExitCode::SUCCESS
        }
        Err(MainOutcome::Fatal(e)) => {
            tracing::error!(error = %e, "fatal error, exiting");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<(), MainOutcome> {
    let config = config::load_from(cli.config.as_deref()).map_err(MainOutcome::Fatal)?;
    config::init_global(config.clone());
    tracing::info!(banner = %config.redacted_banner(), "starting evm-sync");

    let db_pool = db::connect(&config.database_url, config.db_max_connections)
        .await
        .map_err(MainOutcome::Fatal)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Migrate => {
            db::run_migrations(&db_pool).await.map_err(MainOutcome::Fatal)?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Command::Run => run_service(config, db_pool).await,
        Command::GapRepair => run_gap_repair(config, db_pool).await,
    }
}

fn build_rpc_pool(config: &AppConfig) -> Result<Arc<RpcPool>, MainOutcome> {
    RpcPool::new(RpcPoolConfig {
        endpoints: config.rpc_endpoints.clone(),
        per_request_timeout: config.rpc_timeout,
        max_retries: config.max_retries,
        backoff_base: Duration::from_millis(100),
        backoff_cap: Duration::from_secs(10),
    })
    .map(Arc::new)
    .map_err(MainOutcome::Fatal)
}

async fn acquire_lock_or_exit(db_pool: &Pool<Postgres>, chain_id: u64) -> Result<AdvisoryLock, MainOutcome> {
    let lock_name = lock_name_for_chain(chain_id);
    AdvisoryLock::try_acquire(db_pool, &lock_name)
        .await
        .map_err(MainOutcome::Fatal)?
        .ok_or(MainOutcome::LockHeld)
}

async fn run_service(config: AppConfig, db_pool: Pool<Postgres>) -> Result<(), MainOutcome> {
    let config = Arc::new(config);
    let lock = acquire_lock_or_exit(&db_pool, config.chain_id).await?;

    let rpc = build_rpc_pool(&config)?;
    let health_state = HealthState::new(db_pool.clone(), rpc.clone(), &config);
    let health_task = tokio::spawn(health::serve(health_state.clone(), config.health_port));

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    let signal_task = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let engine = SyncEngine::new(config.chain_id, rpc, db_pool.clone(), config.clone());
    let poll_loop = PollLoop::new(engine, config.clone());

    let result = poll_loop.run(shutdown).await;

    health_state.mark_shutting_down();
    signal_task.abort();
    health_task.abort();

    // Release the advisory lock and drain the pool as the last steps of
    // graceful shutdown, regardless of how the loop ended.
    if let Err(e) = lock.release().await {
        tracing::warn!(error = %e, "failed to release advisory lock during shutdown");
    }
    db_pool.close().await;

    result.map_err(MainOutcome::from)
}

async fn run_gap_repair(config: AppConfig, db_pool: Pool<Postgres>) -> Result<(), MainOutcome> {
    let config = Arc::new(config);
    let lock = acquire_lock_or_exit(&db_pool, config.chain_id).await?;

    let rpc = build_rpc_pool(&config)?;
    let engine = SyncEngine::new(config.chain_id, rpc, db_pool.clone(), config.clone());

    let (filled, failed) = gap_repair::repair_all_gaps(&engine, config.chain_id, 1000)
        .await
        .map_err(MainOutcome::Fatal)?;
    tracing::info!(filled, failed, "gap repair pass complete");

    lock.release().await.map_err(MainOutcome::Fatal)?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    tokio::spawn(async move {
        loop {
            sighup.recv().await;
            tracing::debug!("SIGHUP received, ignored");
        }
    });

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down gracefully"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down gracefully"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c, shutting down gracefully");
}
