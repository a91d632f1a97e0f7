//! tileindex — ingest tilemap placement events into a queryable projection.
//!
//! Usage:
//! ```bash
//! # Follow a contract over WebSocket, resuming from the stored checkpoint
//! WSS_RPC_ENDPOINT=wss://node.example CONTRACT_ADDRESS=0x... DATABASE_URL=postgres://... tileindex
//!
//! # Poll over HTTP instead, keeping everything in memory
//! tileindex run --http-url https://node.example --contract 0x... --storage memory
//!
//! tileindex status
//! tileindex info
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use tileindex_core::checkpoint::{CheckpointManager, CheckpointStore};
use tileindex_core::decoder::EventDecoder;
use tileindex_core::dispatcher::build_dispatcher;
use tileindex_core::error::IndexerError;
use tileindex_core::indexer::{DispatchMode, IndexerConfig, StartPolicy};
use tileindex_core::sink::ProjectionSink;
use tileindex_core::supervisor::Supervisor;
use tileindex_core::transport::LogTransport;
use tileindex_evm::{contract_filter, HttpRpcClient, IndexerBuilder, PollingTransport, WsTransport};
use tileindex_storage::{InMemoryStorage, PostgresStorage};

/// TileIndex - tilemap placement event indexer.
#[derive(Parser, Debug)]
#[command(name = "tileindex")]
#[command(about = "Ingest tilemap placement events into a queryable projection")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Arguments of the default `run` command.
    #[command(flatten)]
    run: RunArgs,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest events until interrupted (default).
    Run(RunArgs),
    /// Print the stored checkpoint and projection size.
    Status(StatusArgs),
    /// Print defaults and event signatures.
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageKind {
    Postgres,
    Memory,
}

#[derive(Args, Debug, Clone)]
struct StorageArgs {
    /// Storage backend.
    #[arg(long, env = "STORAGE", value_enum, default_value = "postgres")]
    storage: StorageKind,

    /// PostgreSQL database URL (required with `--storage postgres`).
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct StatusArgs {
    #[command(flatten)]
    storage: StorageArgs,

    /// Print as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    storage: StorageArgs,

    /// WebSocket RPC endpoint for the live subscription.
    #[arg(long, env = "WSS_RPC_ENDPOINT")]
    ws_url: Option<String>,

    /// HTTP RPC endpoint. Selects the polling transport when set.
    #[arg(long, env = "HTTP_RPC_ENDPOINT")]
    http_url: Option<String>,

    /// Contract whose events are indexed.
    #[arg(long = "contract", env = "CONTRACT_ADDRESS")]
    contract_address: Option<String>,

    /// `latest`, `resume` or a block number.
    #[arg(long, env = "STARTING_BLOCK", default_value = "latest")]
    starting_block: StartPolicy,

    /// Polling interval in milliseconds.
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 15_000)]
    poll_interval: u64,

    #[arg(long, env = "MAX_BLOCKS_PER_BATCH", default_value_t = 10_000)]
    max_blocks_per_batch: u64,

    #[arg(long, env = "MAX_RECONNECT_ATTEMPTS", default_value_t = 10)]
    max_reconnect_attempts: u32,

    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 1_000)]
    backoff_base_ms: u64,

    #[arg(long, env = "BACKOFF_CAP_MS", default_value_t = 30_000)]
    backoff_cap_ms: u64,

    /// `direct` or `queued`.
    #[arg(long, env = "DISPATCH_MODE", default_value = "direct")]
    dispatch: DispatchMode,

    #[arg(long, env = "QUEUE_WORKERS", default_value_t = 4)]
    queue_workers: usize,

    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 1_024)]
    queue_capacity: usize,

    #[arg(long, env = "JOB_ATTEMPTS", default_value_t = 3)]
    job_attempts: u32,

    #[arg(long, env = "JOB_BACKOFF_MS", default_value_t = 1_000)]
    job_backoff_ms: u64,

    #[arg(long, env = "CHECKPOINT_FLUSH_MS", default_value_t = 1_000)]
    checkpoint_flush_ms: u64,

    #[arg(long, env = "SHUTDOWN_TIMEOUT_MS", default_value_t = 10_000)]
    shutdown_timeout_ms: u64,
}

impl RunArgs {
    fn indexer_config(&self) -> Result<IndexerConfig, IndexerError> {
        let contract = self
            .contract_address
            .clone()
            .ok_or_else(|| IndexerError::Config("CONTRACT_ADDRESS is required".into()))?;
        IndexerBuilder::new()
            .contract(contract)
            .start(self.starting_block)
            .poll_interval_ms(self.poll_interval)
            .max_blocks_per_batch(self.max_blocks_per_batch)
            .max_reconnect_attempts(self.max_reconnect_attempts)
            .backoff_ms(self.backoff_base_ms, self.backoff_cap_ms)
            .dispatch(self.dispatch)
            .queue(self.queue_workers, self.queue_capacity)
            .job_retry(self.job_attempts, self.job_backoff_ms)
            .checkpoint_flush_ms(self.checkpoint_flush_ms)
            .shutdown_timeout_ms(self.shutdown_timeout_ms)
            .build()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let result = match cli.command.unwrap_or(Command::Run(cli.run)) {
        Command::Run(args) => run(args).await,
        Command::Status(args) => status(args).await.map(|()| ExitCode::SUCCESS),
        Command::Info => {
            info_cmd();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "tileindex failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = args.indexer_config().context("invalid configuration")?;
    let decoder = EventDecoder::new(&config.contract_address);
    let filter = contract_filter(&decoder);

    let transport: Arc<dyn LogTransport> = match (&args.http_url, &args.ws_url) {
        (Some(url), _) => {
            let client = HttpRpcClient::new(url, HttpRpcClient::DEFAULT_TIMEOUT)?;
            Arc::new(PollingTransport::new(
                Arc::new(client),
                filter,
                config.poll_interval(),
                config.max_blocks_per_batch,
            ))
        }
        (None, Some(url)) => Arc::new(WsTransport::new(url, filter, config.max_blocks_per_batch)),
        (None, None) => {
            return Err(IndexerError::Config(
                "set WSS_RPC_ENDPOINT or HTTP_RPC_ENDPOINT".into(),
            ))
            .context("invalid configuration")
        }
    };

    let storage = Storage::open(&args.storage).await?;
    let dispatcher = build_dispatcher(&config, decoder, storage.sink());

    info!(
        transport = transport.name(),
        contract = %config.contract_address,
        start = %config.start,
        dispatch = %config.dispatch,
        "starting tileindex"
    );

    let mut supervisor = Supervisor::new(
        config,
        transport,
        dispatcher,
        CheckpointManager::new(storage.checkpoint_store()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    match supervisor.run(shutdown_rx).await {
        Ok(()) => {
            info!("shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, state = %supervisor.state(), "indexer stopped with an error");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn status(args: StatusArgs) -> Result<()> {
    let storage = Storage::open(&args.storage).await?;
    let checkpoint = storage.checkpoint_store().get().await?;
    let tiles = storage.tile_count().await?;

    if args.json {
        let out = serde_json::json!({ "checkpoint": checkpoint, "tiles": tiles });
        println!("{out}");
    } else {
        match checkpoint {
            Some(block) => println!("checkpoint: block {block} (resumes at {})", block + 1),
            None => println!("checkpoint: none"),
        }
        println!("tiles:      {tiles}");
    }
    Ok(())
}

fn info_cmd() {
    let defaults = IndexerConfig::default();
    let decoder = EventDecoder::new("0x0000000000000000000000000000000000000000");

    println!("TileIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default start: {}", defaults.start);
    println!("  Default poll interval: {} ms", defaults.poll_interval_ms);
    println!("  Default batch size: {} blocks/call", defaults.max_blocks_per_batch);
    println!(
        "  Reconnect: {} attempts, backoff {}..{} ms",
        defaults.max_reconnect_attempts, defaults.backoff_base_ms, defaults.backoff_cap_ms
    );
    println!("  Default dispatch: {}", defaults.dispatch);
    println!("  Storage backends: postgres, memory");
    println!("  Events:");
    for shape in decoder.shapes() {
        println!("    {} {}", shape.signature, shape.topic0);
    }
}

// ─── Storage wiring ──────────────────────────────────────────────────────────

enum Storage {
    Memory(Arc<InMemoryStorage>),
    Postgres(Arc<PostgresStorage>),
}

impl Storage {
    async fn open(args: &StorageArgs) -> Result<Self> {
        match args.storage {
            StorageKind::Memory => {
                warn!("using in-memory storage, nothing survives a restart");
                Ok(Self::Memory(Arc::new(InMemoryStorage::new())))
            }
            StorageKind::Postgres => {
                let url = args
                    .database_url
                    .as_deref()
                    .ok_or_else(|| IndexerError::Config("DATABASE_URL is required".into()))
                    .context("invalid configuration")?;
                let store = PostgresStorage::connect(url)
                    .await
                    .context("failed to open Postgres storage")?;
                Ok(Self::Postgres(Arc::new(store)))
            }
        }
    }

    fn sink(&self) -> Arc<dyn ProjectionSink> {
        match self {
            Self::Memory(s) => s.clone(),
            Self::Postgres(s) => s.clone(),
        }
    }

    fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        match self {
            Self::Memory(s) => s.clone(),
            Self::Postgres(s) => s.clone(),
        }
    }

    async fn tile_count(&self) -> Result<u64> {
        Ok(match self {
            Self::Memory(s) => s.len() as u64,
            Self::Postgres(s) => s.len().await?,
        })
    }
}

// ─── Process plumbing ────────────────────────────────────────────────────────

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
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
