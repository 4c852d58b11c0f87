//! Sync runner CLI.
//!
//! # Usage
//!
//! ```bash
//! bestbet-sync mlb --since 2025-08-01
//! bestbet-sync wnba --dry-run
//! ```
//!
//! Credentials and the database path come from the environment (or a
//! `.env` file): `DB_PATH` plus `<SPORT>_API_KEY` / `<SPORT>_API_HOST`.
//!
//! # Exit Codes
//!
//! - 0: run completed (per-record failures, if any, are in the JSON summary)
//! - 1: run aborted on a fatal error
//! - 2: configuration or validation error

use clap::Parser;
use chrono::NaiveDate;
use dotenv::dotenv;
use tracing::{error, warn};

use bestbet_sync::{
    cancel_channel, ApiClient, Config, Coordinator, Reconciler, RunOptions, SportId, SyncStore,
};

#[derive(Debug, Parser)]
#[command(name = "bestbet-sync", about = "Synchronize sports statistics into the local database")]
struct Cli {
    /// Sport to synchronize: mlb, wnba, or nfl.
    sport: String,

    /// Classify every record without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Only fetch games on or after this date (YYYY-MM-DD). Feeds without
    /// a date filter are fetched in full regardless.
    #[arg(long)]
    since: Option<NaiveDate>,
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bestbet_sync=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let sport = match SportId::parse(&cli.sport) {
        Ok(sport) => sport,
        Err(e) => {
            error!("{}", e);
            return 2;
        }
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {:#}", e);
            return 2;
        }
    };
    let creds = match config.credentials(sport) {
        Ok(creds) => creds,
        Err(e) => {
            error!("configuration error: {:#}", e);
            return 2;
        }
    };

    let store = match SyncStore::open(&config.db_path) {
        Ok(store) => store,
        Err(e) => {
            error!(db_path = %config.db_path, error = %e, "cannot open database");
            return 2;
        }
    };
    let client = match ApiClient::new(
        &creds.base_url(),
        creds.host_header(),
        &creds.api_key,
        config.retry.clone(),
    ) {
        Ok(client) => client,
        Err(e) => {
            error!("cannot build API client: {}", e);
            return 2;
        }
    };

    let (cancel_tx, cancel_rx) = cancel_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at next batch boundary");
            cancel_tx.send(true).ok();
        }
    });

    let coordinator = Coordinator::new(client, Reconciler::new(store, cli.dry_run), cancel_rx);
    let opts = RunOptions {
        dry_run: cli.dry_run,
        since: cli.since,
        batch_size: config.batch_size,
    };

    match coordinator.run(sport, &opts).await {
        Ok(outcome) => {
            match serde_json::to_string_pretty(&outcome) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("cannot serialize outcome: {}", e),
            }
            if outcome.failed > 0 {
                warn!(failed = outcome.failed, "run completed with record failures");
            }
            0
        }
        Err(e) => {
            error!("sync aborted: {}", e);
            1
        }
    }
}
