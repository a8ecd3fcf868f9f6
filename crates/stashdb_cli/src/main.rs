//! StashDB CLI
//!
//! Command-line tools for StashDB databases stored by a `FileHost`.
//!
//! # Commands
//!
//! - `inspect` - List databases with their versions, stores and counts
//! - `get` / `put` - Read or write one record
//! - `count` / `dump` - Count or print the records of a store
//! - `estimate` - Show storage usage and quota
//! - `delete-db` - Delete a database and its data

mod commands;
mod context;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// StashDB command-line database tools.
#[derive(Parser)]
#[command(name = "stashdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// JSON schema file (one database config or an array of them)
    #[arg(global = true, short, long)]
    schema: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases with versions, stores and record counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print one record
    Get {
        /// Database name
        db: String,
        /// Store name
        store: String,
        /// Key; parsed as JSON when possible, otherwise taken as a string
        key: String,
    },

    /// Insert or replace one record
    Put {
        /// Database name
        db: String,
        /// Store name
        store: String,
        /// Record as JSON
        value: String,
        /// Out-of-line key for stores without a key path
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Count the records of a store
    Count {
        /// Database name
        db: String,
        /// Store name
        store: String,
    },

    /// Print every record of a store, one JSON document per line
    Dump {
        /// Database name
        db: String,
        /// Store name
        store: String,
        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show storage usage and quota
    Estimate,

    /// Delete a database and all of its data
    DeleteDb {
        /// Database name
        db: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("StashDB CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("StashDB Core v{}", stashdb_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Database path required (--path)")?;
    let storage = context::open_storage(&path, cli.schema.as_deref()).await?;

    let outcome = match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&storage, &path, &format).await,
        Commands::Get { db, store, key } => commands::record::get(&storage, &db, &store, &key).await,
        Commands::Put {
            db,
            store,
            value,
            key,
        } => commands::record::put(&storage, &db, &store, &value, key.as_deref()).await,
        Commands::Count { db, store } => commands::record::count(&storage, &db, &store).await,
        Commands::Dump { db, store, limit } => {
            commands::dump::run(&storage, &db, &store, limit).await
        }
        Commands::Estimate => commands::estimate::run(&storage).await,
        Commands::DeleteDb { db } => commands::delete_db::run(&storage, &db).await,
        Commands::Version => Ok(()),
    };

    storage.close_all();
    outcome
}
