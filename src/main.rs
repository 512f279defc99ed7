use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tracing::{error, info};

use chain_indexer::coin::detect_coin;
use chain_indexer::database::PgStore;
use chain_indexer::error::StoreError;
use chain_indexer::resume::{self, Plan};
use chain_indexer::{ChainWalker, JsonRpcClient, Store};

#[derive(Parser)]
#[command(name = "chain_indexer")]
#[command(version, about = "Index a coin daemon's chain into PostgreSQL", long_about = None)]
struct Cli {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "DATABASE_POOL_SIZE", default_value_t = 4)]
    pool_size: u32,

    #[arg(long, env = "RPC_URL", default_value = "http://127.0.0.1:8332")]
    rpc_url: String,

    #[arg(long, env = "RPC_USER")]
    rpc_user: Option<String>,

    #[arg(long, env = "RPC_PASSWORD", hide_env_values = true)]
    rpc_password: Option<String>,

    /// Per-call timeout for daemon requests
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value_t = 30)]
    rpc_timeout_secs: u64,

    /// What to do when the store already holds blocks; prompts when unset
    #[arg(long, value_enum)]
    on_existing: Option<OnExisting>,

    /// First height to ingest, overriding the resume plan (requires --to)
    #[arg(long, requires = "to")]
    from: Option<u64>,

    /// Last height to ingest (requires --from)
    #[arg(long, requires = "from")]
    to: Option<u64>,

    /// Create missing tables before checking the schema
    #[arg(long)]
    init_schema: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OnExisting {
    Continue,
    Drop,
    Exit,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("chain_indexer=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chain_indexer=info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    info!("Connecting to the database...");
    let store = PgStore::connect(&cli.database_url, cli.pool_size)
        .await
        .context("Failed to connect to the database")?;

    if cli.init_schema {
        store.setup_schema().await.context("Failed to create tables")?;
    }
    match store.verify_schema().await {
        Err(StoreError::Schema { missing }) => {
            anyhow::bail!(
                "These expected tables are missing: {:?} (rerun with --init-schema)",
                missing
            )
        }
        other => other.context("Failed to inspect the database schema")?,
    }

    let client = JsonRpcClient::new(
        cli.rpc_url.clone(),
        cli.rpc_user.clone(),
        cli.rpc_password.clone(),
        Duration::from_secs(cli.rpc_timeout_secs),
    )
    .context("Failed to build the RPC client")?;

    let profile = detect_coin(&client)
        .await
        .context("Could not reach the daemon; check RPC_URL, RPC_USER and RPC_PASSWORD")?;
    let walker = ChainWalker::new(&client, &store, &profile);

    if let (Some(from), Some(to)) = (cli.from, cli.to) {
        if from > 0 {
            resume::repair_forward_link(&client, &store, from - 1).await?;
        }
        let summary = walker.walk(from..=to).await?;
        info!("Indexed up to {:?}", summary.last_height);
        return Ok(());
    }

    if let Some(highest) = store.highest_block().await? {
        info!("Store already holds blocks up to {}", highest.height);
        let choice = match cli.on_existing {
            Some(choice) => choice,
            None => prompt_on_existing()?,
        };
        match choice {
            OnExisting::Continue => {}
            OnExisting::Drop => {
                store.drop_all().await?;
                store.setup_schema().await?;
            }
            OnExisting::Exit => return Ok(()),
        }
    }

    match resume::prepare(&client, &store).await? {
        Plan::UpToDate => Ok(()),
        Plan::Sync(range) => {
            let summary = walker.walk(range).await?;
            info!("Indexed up to {:?}", summary.last_height);
            Ok(())
        }
    }
}

fn prompt_on_existing() -> Result<OnExisting> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("(C)ontinue, (D)rop all, or (E)xit?: ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            return Ok(OnExisting::Exit);
        };
        match line?.trim().to_lowercase().as_str() {
            "c" | "continue" => return Ok(OnExisting::Continue),
            "d" | "drop" | "drop all" => return Ok(OnExisting::Drop),
            "e" | "exit" => return Ok(OnExisting::Exit),
            _ => println!("Can you try that again?"),
        }
    }
}
