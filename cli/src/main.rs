use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use timetravel_kernel::adapters::Backend;
use timetravel_kernel::config::StoreConfig;
use timetravel_kernel::state::{Data, Record, RecordId, Update, Version};
use timetravel_kernel::store::VersionedStore;

/// Timetravel record store CLI
#[derive(Parser, Debug)]
#[command(name = "timetravel")]
#[command(about = "Versioned record store with full history", long_about = None)]
struct Cli {
    /// Path to store config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the configured backend)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a record from a JSON object of string values
    Create {
        #[arg(allow_negative_numbers = true)]
        id: i64,
        data: String,
    },

    /// Apply a JSON update; null values delete keys
    Update {
        #[arg(allow_negative_numbers = true)]
        id: i64,
        update: String,
    },

    /// Update the record, creating it if absent
    Upsert {
        #[arg(allow_negative_numbers = true)]
        id: i64,
        update: String,
    },

    /// Print a record, optionally at a past version
    Get {
        #[arg(allow_negative_numbers = true)]
        id: i64,

        /// Version to fetch; 0 or omitted means latest
        #[arg(long, default_value_t = 0)]
        version: Version,

        /// Output shape: 1 omits the version field
        #[arg(long, default_value_t = 2)]
        api_version: u8,
    },

    /// Print every version of a record, oldest first
    Versions {
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },
}

/// Wrapper for JSON output of `versions`
#[derive(Debug, Serialize)]
struct VersionsOutput {
    versions: Vec<Record>,
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let config = match &cli.config {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            StoreConfig::from_json(&data)?
        }
        None => StoreConfig::default_config(),
    };

    Ok(match &cli.db {
        Some(path) => config.with_sqlite_path(path),
        None => config,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Open store
    // ----------------------------
    let config = load_config(&cli)?;
    let backend = Backend::open(&config.backend).context("opening backend")?;
    let store = VersionedStore::new(backend);

    // ----------------------------
    // Run command
    // ----------------------------
    match cli.command {
        Command::Create { id, data } => {
            let data: Data = serde_json::from_str(&data).context("invalid record data")?;
            print_json(&store.create_record(RecordId(id), data)?)
        }
        Command::Update { id, update } => {
            let update: Update = serde_json::from_str(&update).context("invalid update")?;
            print_json(&store.update_record(RecordId(id), &update)?)
        }
        Command::Upsert { id, update } => {
            let update: Update = serde_json::from_str(&update).context("invalid update")?;
            print_json(&store.upsert_record(RecordId(id), &update)?)
        }
        Command::Get {
            id,
            version,
            api_version,
        } => {
            let record = store.get_version(RecordId(id), version)?;
            match api_version {
                1 => print_json(&record.into_v1()),
                2 => print_json(&record),
                other => bail!("unsupported api version {other}"),
            }
        }
        Command::Versions { id } => print_json(&VersionsOutput {
            versions: store.get_all_versions(RecordId(id))?,
        }),
    }
}
