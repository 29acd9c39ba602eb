//! ei-sync
//!
//! Schema-driven streaming export and import between a relational store and
//! JSON or XML documents.
//!
//! # Overview
//!
//! A schema document names a `main` unit, an `extract` section describing
//! where records come from, and a `load` section describing what happens to
//! them:
//!
//! - extraction walks `db` units (tables with nested `details` and
//!   `references`) or streams `json` / `xml` documents, matching objects by
//!   their nesting path;
//! - loading renders records as JSON text, upserts them into the store,
//!   collects the statements it would run, or bulk-copies them into one
//!   table.
//!
//! The two sides run concurrently, connected by a bounded channel.
//!
//! # CLI Usage
//!
//! ```bash
//! # Export rows of the main unit into a file
//! ei-sync export --schema orders.json --output orders.out \
//!   --connection-string "host=localhost user=postgres" --filter '{"id": [1, 2]}'
//!
//! # Import a document
//! ei-sync import --schema orders.json --input orders.xml \
//!   --connection-string "host=localhost user=postgres"
//! ```

use clap::Parser;

pub mod api;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod testing;

pub use api::{ImportCounts, RunSummary, Session};
pub use ei_schema::{Filter, Schema};

#[derive(Parser, Clone, Debug)]
pub struct PostgresOpts {
    /// PostgreSQL connection string
    #[arg(
        long,
        default_value = "host=localhost user=postgres",
        env = "EI_SYNC_CONNECTION_STRING"
    )]
    pub connection_string: String,

    /// Records buffered between extraction and load
    #[arg(
        long,
        default_value_t = pipeline::DEFAULT_PIPELINE_DEPTH,
        env = "EI_SYNC_PIPELINE_DEPTH"
    )]
    pub pipeline_depth: usize,
}
