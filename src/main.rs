//! Binary entry point for assetdb.
//!
//! Administers the asset database: creation, schema migrations and status.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stdout/print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use assetdb::config::AssetDbConfig;
use assetdb::observability::{self, LoggingConfig};
use assetdb::{Backend, Store, open_store};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// assetdb - asset graph persistence for reconnaissance data.
#[derive(Parser)]
#[command(name = "assetdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "ASSETDB_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Manage the database.
    Db {
        /// Database subcommand.
        #[command(subcommand)]
        action: DbAction,
    },
}

/// Database subcommands.
#[derive(Subcommand)]
enum DbAction {
    /// Create the database if needed and apply the initial schema.
    Init,
    /// Apply every pending migration.
    Upgrade,
    /// Show the backend and migration state.
    Status,
    /// Create the database if it does not exist.
    Create,
    /// Delete the database.
    Drop {
        /// Skip confirmation.
        #[arg(short, long)]
        force: bool,
    },
    /// Revert applied migrations, newest first.
    Rollback {
        /// Number of migrations to revert.
        #[arg(short, long, default_value = "1")]
        steps: usize,
    },
}

/// Main entry point.
fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init(LoggingConfig::from_settings(
        Some(&config.logging),
        cli.verbose,
    )) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration from the given file or the default location, then
/// applies `ASSETDB_*` environment overrides.
fn load_config(path: Option<&Path>) -> anyhow::Result<AssetDbConfig> {
    let config = match path {
        Some(path) => AssetDbConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => AssetDbConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}

/// Runs the selected command.
fn run_command(command: Commands, config: &AssetDbConfig) -> anyhow::Result<()> {
    let Commands::Db { action } = command;
    let store = open_store(&config.database).context("opening store")?;

    match action {
        DbAction::Init => {
            store.create_database_if_not_exists()?;
            let applied = store.run_init_migration()?;
            println!("Initialized {} ({applied} migration(s) applied)", describe(&store));
        },
        DbAction::Upgrade => {
            let applied = store.run_migrations()?;
            println!("Applied {applied} migration(s)");
        },
        DbAction::Status => cmd_status(&store)?,
        DbAction::Create => {
            store.create_database_if_not_exists()?;
            println!("Database ready: {}", describe(&store));
        },
        DbAction::Drop { force } => {
            if !force {
                anyhow::bail!("refusing to drop {} without --force", describe(&store));
            }
            store.drop_database()?;
            println!("Dropped {}", describe(&store));
        },
        DbAction::Rollback { steps } => {
            let Some(sqlite) = store.as_relational() else {
                anyhow::bail!("the graph backend has no migrations to roll back");
            };
            let reverted = sqlite.rollback_migrations(steps)?;
            println!("Rolled back {reverted} migration(s)");
        },
    }
    Ok(())
}

/// Prints backend and migration state.
fn cmd_status(store: &Backend) -> anyhow::Result<()> {
    println!("Backend:  {}", store.kind());
    println!("Database: {}", describe(store));
    println!("Created:  {}", store.is_database_created()?);

    let Some(sqlite) = store.as_relational() else {
        return Ok(());
    };
    if !store.is_database_created()? {
        return Ok(());
    }
    println!("Pending:  {}", store.pending_migrations_count()?);
    println!();
    for status in sqlite.migration_status()? {
        let mark = if status.applied { "x" } else { " " };
        println!("  [{mark}] {}", status.id);
    }
    Ok(())
}

/// Human-readable location of the store.
fn describe(store: &Backend) -> String {
    store.as_relational().map_or_else(
        || "in-memory graph".to_string(),
        |sqlite| sqlite.path().display().to_string(),
    )
}
