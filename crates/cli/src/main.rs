//! Sourcerer CLI - raise account events and inspect the event log.
//!
//! Projections are held in memory, so every invocation rebuilds the state it
//! needs from the configured log before acting.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sourcerer_core::AggregateId;
use sourcerer_infra::SourcererConfig;

/// Sourcerer - event log with replay-driven projections
#[derive(Parser)]
#[command(
    name = "sourcerer",
    version,
    about = "Raise account events and inspect the event log",
    propagate_version = true
)]
pub struct Cli {
    /// Event store backend (memory, file, postgres)
    #[arg(long, global = true, env = "SOURCERER_STORE")]
    store: Option<String>,

    /// Path of the JSON-lines log for the file backend
    #[arg(long, global = true, env = "SOURCERER_STORE_PATH")]
    store_path: Option<String>,

    /// Postgres connection string for the postgres backend
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Log output (json, pretty)
    #[arg(long, global = true, env = "SOURCERER_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open an account (a new id is generated when none is given)
    Open {
        email: String,
        #[arg(long)]
        account: Option<AggregateId>,
    },

    /// Add money to an account
    Add { account: AggregateId, amount: i64 },

    /// Subtract money from an account
    Subtract { account: AggregateId, amount: i64 },

    /// Raise a transient event that is never stored
    Ping,

    /// List stored records in log order
    List {
        /// Only records of this event type
        #[arg(long = "type")]
        event_type: Option<String>,
        /// Only records targeting this account
        #[arg(long)]
        account: Option<AggregateId>,
        /// Start after this record id
        #[arg(long, default_value_t = 0)]
        after: u64,
    },

    /// Show one stored record
    Get { id: u64 },

    /// Rebuild one account from the log
    Replay { account: AggregateId },

    /// Rebuild every account and print the balances
    Balances,

    /// Walk an account from 1234 down past zero and show the reactions
    Demo,
}

impl Cli {
    fn config(&self) -> Result<SourcererConfig> {
        let config = SourcererConfig::from_lookup(|key| match key {
            "SOURCERER_STORE" => self.store.clone(),
            "SOURCERER_STORE_PATH" => self.store_path.clone(),
            "DATABASE_URL" => self.database_url.clone(),
            "SOURCERER_LOG_FORMAT" => self.log_format.clone(),
            _ => None,
        })?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;
    sourcerer_observability::init(config.log_format);

    let store = config
        .open_store()
        .await
        .with_context(|| format!("opening {} event store", config.store.name()))?;

    let output = tokio::task::spawn_blocking(move || commands::execute(cli.command, store))
        .await
        .context("command task panicked")??;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
