//! tipwatch CLI: run the indexers, inspect and manage cursor state.
//!
//! Usage:
//! ```bash
//! tipwatch run                        # head tracker + donation indexer
//! tipwatch heads                      # head tracker only
//! tipwatch donations                  # donation indexer only
//! tipwatch status
//! tipwatch list --from 19000000 --limit 20
//! tipwatch reset --table donations --from 19000100
//! ```
//!
//! Every option can also be set through the environment (or a `.env` file).

mod logging;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tipwatch_core::{
    run_loop, CursorTable, DonationStore, IndexerConfig, LoopStats, PollOptions, Reconciler,
};
use tipwatch_evm::{IndexerBuilder, Pipeline, TokenRegistry};
use tipwatch_storage::postgres::PostgresStorage;
use tipwatch_storage::sqlite::SqliteStorage;
use tipwatch_storage::InMemoryStorage;

use crate::logging::{init_tracing, LogConfig};

/// Reorg-safe Donate event indexer.
#[derive(Parser, Debug)]
#[command(name = "tipwatch", version)]
#[command(about = "Reorg-safe chain head tracker and Donate event indexer", long_about = None)]
struct Cli {
    /// Storage: `memory`, a SQLite path / `sqlite:` URL, or a `postgres://` URL.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:tipwatch.db?mode=rwc", global = true)]
    database_url: String,

    /// Log filter directives (e.g. `info,tipwatch_evm=debug`).
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit JSON logs.
    #[arg(long, env = "LOG_JSON", default_value_t = false, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the head tracker and the donation indexer together.
    Run(ChainArgs),
    /// Run only the head tracker.
    Heads(ChainArgs),
    /// Run only the donation indexer (reads the head tracker's table).
    Donations(ChainArgs),
    /// Show both cursors and the number of stored donations.
    Status,
    /// List stored donations.
    List {
        /// First height to list.
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Print one JSON object per line.
        #[arg(long)]
        json: bool,
    },
    /// Delete cursor rows (and, for `donations`, their records) from a height up.
    Reset {
        #[arg(long, value_enum)]
        table: TableArg,
        #[arg(long)]
        from: u64,
    },
}

#[derive(Args, Debug, Clone)]
struct ChainArgs {
    /// JSON-RPC endpoint.
    #[arg(long, env = "RPC_URL")]
    rpc_url: String,

    /// Address of the contract emitting `Donate`.
    #[arg(long, env = "CONTRACT_ADDRESS")]
    contract_address: String,

    /// Floor height; indexing starts at the next block.
    #[arg(long, env = "START_BLOCK", default_value_t = 0)]
    start_block: u64,

    /// Heights indexed per pass.
    #[arg(long, env = "MAX_BATCH", default_value_t = 50)]
    max_batch: u64,

    /// Wait between passes once caught up.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 2_000)]
    poll_interval_ms: u64,

    /// Wait between passes while catching up.
    #[arg(long, env = "MIN_INTERVAL_MS", default_value_t = 0)]
    min_interval_ms: u64,

    /// Base URL of the donation alert webhook.
    #[arg(long, env = "NOTIFICATION_BASE_URL")]
    notification_base_url: Option<String>,

    /// JSON file mapping token addresses to `{ "symbol", "decimals" }`.
    #[arg(long, env = "TOKEN_REGISTRY")]
    token_registry: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum TableArg {
    Heads,
    Donations,
}

impl From<TableArg> for CursorTable {
    fn from(arg: TableArg) -> Self {
        match arg {
            TableArg::Heads => CursorTable::Heads,
            TableArg::Donations => CursorTable::Donations,
        }
    }
}

impl ChainArgs {
    fn config(&self) -> IndexerConfig {
        IndexerConfig {
            rpc_url: self.rpc_url.clone(),
            contract_address: self.contract_address.clone(),
            start_block: self.start_block,
            max_batch: self.max_batch,
            poll_interval_ms: self.poll_interval_ms,
            min_interval_ms: self.min_interval_ms,
            ..IndexerConfig::default()
        }
    }

    fn tokens(&self) -> anyhow::Result<TokenRegistry> {
        let Some(path) = &self.token_registry else {
            return Ok(TokenRegistry::new());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading token registry {path}"))?;
        TokenRegistry::from_json(&json).with_context(|| format!("parsing token registry {path}"))
    }

    fn pipeline(&self, store: Arc<dyn DonationStore>) -> anyhow::Result<Pipeline<dyn DonationStore>> {
        let mut builder = IndexerBuilder::from_config(self.config());
        if let Some(url) = &self.notification_base_url {
            let tokens = self.tokens()?;
            info!(url = %url, tokens = tokens.len(), "donation alerts enabled");
            builder = builder.notifications(url, tokens);
        }
        Ok(builder.build(store)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so it can feed `env = ...` arguments.
    let dotenv = std::env::var("DOTENV_PATH").unwrap_or_else(|_| ".env".into());
    if Path::new(&dotenv).exists() {
        dotenvy::from_path(&dotenv)?;
    }

    let cli = Cli::parse();
    init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
    });

    let store = open_store(&cli.database_url).await?;

    match &cli.command {
        Command::Run(args) => {
            let Pipeline {
                heads,
                donations,
                options,
            } = args.pipeline(store)?;
            let cancel = shutdown_token();
            let (a, b) = tokio::join!(
                drive(&heads, &options, &cancel),
                drive(&donations, &options, &cancel)
            );
            let (heads, donations) = (a?, b?);
            info!(?heads, ?donations, "indexers stopped");
        }
        Command::Heads(args) => {
            let pipeline = args.pipeline(store)?;
            drive(&pipeline.heads, &pipeline.options, &shutdown_token()).await?;
        }
        Command::Donations(args) => {
            let pipeline = args.pipeline(store)?;
            drive(&pipeline.donations, &pipeline.options, &shutdown_token()).await?;
        }
        Command::Status => cmd_status(store.as_ref()).await?,
        Command::List { from, limit, json } => {
            cmd_list(store.as_ref(), *from, *limit, *json).await?
        }
        Command::Reset { table, from } => {
            let table = CursorTable::from(*table);
            let removed = store.truncate_from(table, *from).await?;
            println!("{table}: removed {removed} rows from height {from}");
        }
    }
    Ok(())
}

/// Open the backend named by `url`.
async fn open_store(url: &str) -> anyhow::Result<Arc<dyn DonationStore>> {
    let store: Arc<dyn DonationStore> = if url == "memory" {
        Arc::new(InMemoryStorage::new())
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Arc::new(PostgresStorage::connect(url).await?)
    } else if url.contains("://") && !url.starts_with("sqlite:") {
        bail!("unsupported DATABASE_URL scheme: {url}");
    } else {
        Arc::new(SqliteStorage::open(url).await?)
    };
    Ok(store)
}

/// Token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            child.cancel();
        }
    });
    cancel
}

/// Run one indexer loop; a fatal error also stops its sibling.
async fn drive<R: Reconciler + ?Sized>(
    reconciler: &R,
    options: &PollOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<LoopStats> {
    match run_loop(reconciler, options, cancel).await {
        Ok(stats) => Ok(stats),
        Err(e) => {
            error!(indexer = reconciler.name(), error = %e, "indexer stopped");
            cancel.cancel();
            Err(e).with_context(|| format!("{} indexer failed", reconciler.name()))
        }
    }
}

async fn cmd_status(store: &dyn DonationStore) -> anyhow::Result<()> {
    for table in [CursorTable::Heads, CursorTable::Donations] {
        match store.latest(table).await? {
            Some(entry) => println!("{table:<10} {} {}", entry.height, entry.hash),
            None => println!("{table:<10} (empty)"),
        }
    }
    println!("{:<10} {}", "records", store.donation_count().await?);
    Ok(())
}

async fn cmd_list(
    store: &dyn DonationStore,
    from: u64,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    for d in store.donations_from(from, limit).await? {
        if json {
            println!("{}", serde_json::to_string(&d)?);
        } else {
            println!(
                "{:>10} {:>4}  {} -> {}  {} + {} of {}  \"{}\": {}",
                d.height,
                d.log_index,
                d.donor,
                d.recipient,
                d.net_amount,
                d.commission,
                d.token_address,
                d.donor_name,
                d.message
            );
        }
    }
    Ok(())
}
