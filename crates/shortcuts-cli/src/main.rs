//! Shortcut store CLI
//!
//! Opens a store directory directly and provides:
//! - Listing and reordering of categories, shortcuts and variables
//! - Inspection and editing of the pending execution queue
//! - WAL verification, compaction and store statistics
//! - Locking and unlocking the app

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shortcuts_store::{Store, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

use commands::{collection, maintenance, queue};

#[derive(Parser)]
#[command(name = "shortcuts")]
#[command(about = "Inspect and maintain a shortcut store", long_about = None)]
#[command(version)]
struct Cli {
    /// Store configuration file (TOML)
    #[arg(short, long, env = "SHORTCUTS_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory, overrides the configured one
    #[arg(short, long, env = "SHORTCUTS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Collection(collection::CollectionCommands),

    /// Pending executions
    Queue {
        #[command(subcommand)]
        command: queue::QueueCommands,
    },

    /// Store counters as JSON
    Stats,

    /// Check WAL checksums and collection invariants
    Verify,

    /// Snapshot the state and drop older WAL segments
    Compact,

    /// Lock the app with a password
    Lock {
        #[arg(long, env = "SHORTCUTS_PASSWORD")]
        password: String,
    },

    /// Remove the app lock
    Unlock {
        #[arg(long, env = "SHORTCUTS_PASSWORD")]
        password: String,
    },
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shortcuts")
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if config.data_dir.is_none() {
        config.data_dir = Some(default_data_dir());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let config = load_config(&cli)?;
    tracing::debug!(data_dir = ?config.data_dir, "Opening store");
    let store = Store::open(config).await.context("opening store")?;

    let result = match cli.command {
        Commands::Collection(command) => collection::execute(command, &store, cli.output).await,
        Commands::Queue { command } => queue::execute(command, &store, cli.output).await,
        Commands::Stats => maintenance::stats(&store).await,
        Commands::Verify => maintenance::verify(&store).await,
        Commands::Compact => maintenance::compact(&store).await,
        Commands::Lock { password } => maintenance::lock(&store, &password).await,
        Commands::Unlock { password } => maintenance::unlock(&store, &password).await,
    };

    store.close().await?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn data_dir_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "data_dir = \"/elsewhere\"\ncompact_every = 10\n").unwrap();

        let cli = Cli::parse_from([
            "shortcuts",
            "--config",
            path.to_str().unwrap(),
            "--data-dir",
            "/tmp/override",
            "stats",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/override")));
        assert_eq!(config.compact_every, Some(10));
    }

    #[test]
    fn move_arguments_parse() {
        let cli = Cli::parse_from(["shortcuts", "move", "3", "--category", "2", "--position", "0"]);
        match cli.command {
            Commands::Collection(collection::CollectionCommands::Move {
                shortcut,
                category,
                position,
            }) => {
                assert_eq!((shortcut, category, position), (3, Some(2), Some(0)));
            }
            _ => panic!("expected move"),
        }
    }
}
