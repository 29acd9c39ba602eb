//! Command-line interface for ei-sync
//!
//! # Usage Examples
//!
//! ## Export
//! ```bash
//! # Export two orders with their lines as JSON text
//! ei-sync export \
//!   --schema schemas/orders.json \
//!   --output orders.json \
//!   --filter '{"id": [1, 2]}' \
//!   --connection-string "host=localhost user=postgres dbname=shop"
//! ```
//!
//! ## Import
//! ```bash
//! # Upsert the records of an XML document
//! ei-sync import \
//!   --schema schemas/orders-import.json \
//!   --input orders.xml \
//!   --connection-string "host=localhost user=postgres dbname=shop"
//! ```
//!
//! Log verbosity follows `RUST_LOG`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ei_sync::{Filter, PostgresOpts, Schema, Session};
use ei_sync_postgresql::PostgresProvider;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ei-sync")]
#[command(about = "Schema-driven export and import between PostgreSQL and JSON/XML documents")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract per schema and write the load output to a file
    Export {
        /// Schema document (JSON)
        #[arg(long, value_name = "PATH")]
        schema: PathBuf,

        /// File receiving the rendered output
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Filter on the main unit as a JSON object, e.g. '{"id": [1, 2]}'
        #[arg(long, value_name = "JSON")]
        filter: Option<String>,

        #[command(flatten)]
        db_opts: PostgresOpts,
    },
    /// Read a JSON or XML document per schema and load its records
    Import {
        /// Schema document (JSON)
        #[arg(long, value_name = "PATH")]
        schema: PathBuf,

        /// Document to read
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        /// Filter on the main unit as a JSON object
        #[arg(long, value_name = "JSON")]
        filter: Option<String>,

        #[command(flatten)]
        db_opts: PostgresOpts,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            schema,
            output,
            filter,
            db_opts,
        } => {
            let schema = load_schema(&schema)?;
            let filter = parse_filter(filter.as_deref())?;
            let session = session(&db_opts);
            let summary = session
                .export_by_schema(&schema, &output, filter.as_ref())
                .await
                .with_context(|| format!("Export to {} failed", output.display()))?;
            for failure in &summary.failures {
                tracing::warn!("Query of unit '{}' failed: {}", failure.unit, failure.message);
            }
            tracing::info!(
                "Exported {} records to {}",
                summary.processed,
                output.display()
            );
        }
        Commands::Import {
            schema,
            input,
            filter,
            db_opts,
        } => {
            let schema = load_schema(&schema)?;
            let filter = parse_filter(filter.as_deref())?;
            let session = session(&db_opts);
            let counts = session
                .import_by_schema(&schema, &input, filter.as_ref())
                .await
                .with_context(|| format!("Import of {} failed", input.display()))?;
            println!("{}", serde_json::to_string(&counts)?);
        }
    }

    Ok(())
}

fn session(opts: &PostgresOpts) -> Session<PostgresProvider> {
    Session::new(PostgresProvider::new(&opts.connection_string))
        .with_pipeline_depth(opts.pipeline_depth)
}

fn load_schema(path: &Path) -> anyhow::Result<Schema> {
    Schema::from_file(path).with_context(|| format!("Failed to load schema from {path:?}"))
}

fn parse_filter(filter: Option<&str>) -> anyhow::Result<Option<Filter>> {
    filter
        .map(|text| Filter::from_json_str(text).context("Filter must be a JSON object"))
        .transpose()
}
