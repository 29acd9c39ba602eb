//! Schema-driven extraction
//!
//! The extractor walks the schema from its `main` unit and sends one record
//! per top-level item into a bounded channel. Dropping the sender is the
//! end-of-stream signal.
//!
//! Two leaf families exist:
//!
//! - `db` units query a table through a [`DbConnection`](ei_connect::DbConnection),
//!   resolving `details` (child rows keyed by the parent's primary key) and
//!   `references` (rows looked up by a foreign key) recursively. Nested
//!   lookups are collected and attached under `#details` / `#references`.
//! - `json` / `xml` units parse the run's input document and emit every
//!   object whose nesting path matches one of the schema's path patterns.
//!
//! A failed `db` query does not fail the run: the branch yields no rows and
//! the failure is reported in [`ExtractSummary::failures`].

mod db;
mod document;

pub use db::{build_select, HIERARCHY_LEVEL};

use ei_connect::DbProvider;
use ei_schema::{Filter, Schema, SchemaError, UnitExtractSpec};
use ei_path_parser::ParseError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

/// Errors that end an extraction run.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The main unit is not declared in the `extract` section
    #[error("Main unit '{0}' is not declared in the extract section")]
    UnknownMainUnit(String),

    /// A document unit was asked to run without an input document
    #[error("Unit '{0}' reads a document but no input was supplied")]
    MissingInput(String),

    #[error("Failed to parse input document: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to acquire a database connection: {0:#}")]
    Connect(anyhow::Error),

    /// The consumer went away before the stream ended
    #[error("Record stream closed by the consumer")]
    Closed,
}

/// A swallowed `db` leaf failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFailure {
    pub unit: String,
    pub message: String,
}

/// Record counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Records produced by the leaf, filtered or not
    pub seen: u64,
    /// Records that passed the filter and were sent downstream
    pub passed: u64,
}

/// Outcome of a completed extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractSummary {
    pub counters: Counters,
    pub failures: Vec<QueryFailure>,
}

/// Drives one extraction run over a schema.
pub struct Extractor<'a, P: DbProvider> {
    schema: &'a Schema,
    provider: &'a P,
    input: Option<Box<dyn AsyncRead + Unpin + Send + 'a>>,
}

impl<'a, P: DbProvider> Extractor<'a, P> {
    pub fn new(schema: &'a Schema, provider: &'a P) -> Self {
        Self {
            schema,
            provider,
            input: None,
        }
    }

    /// Attach the document read by `json` / `xml` main units.
    pub fn with_input(mut self, input: impl AsyncRead + Unpin + Send + 'a) -> Self {
        self.input = Some(Box::new(input));
        self
    }

    /// Run the extraction from the main unit, sending records into `tx`.
    ///
    /// Returns once the last record is accepted; `tx` is dropped on return,
    /// which ends the stream for the receiver.
    pub async fn export(
        self,
        filter: &Filter,
        tx: Sender<Value>,
    ) -> Result<ExtractSummary, ExtractError> {
        let units = self.schema.extract_units()?;
        let main = self.schema.main.as_str();
        let unit = units
            .get(main)
            .ok_or_else(|| ExtractError::UnknownMainUnit(main.to_string()))?;
        info!("Starting {} extraction from unit '{main}'", unit.kind());

        let summary = match unit {
            UnitExtractSpec::Db(db_unit) => {
                let mut walker = db::DbWalker::new(units, self.provider);
                let result = walker.export(main, db_unit, filter, &tx).await;
                // The connection outlives every nested lookup and goes back here
                walker.release().await;
                let counters = result?;
                ExtractSummary {
                    counters,
                    failures: walker.into_failures(),
                }
            }
            UnitExtractSpec::Json(doc_unit) | UnitExtractSpec::Xml(doc_unit) => {
                let input = self
                    .input
                    .ok_or_else(|| ExtractError::MissingInput(main.to_string()))?;
                let format = match unit {
                    UnitExtractSpec::Xml(_) => document::Format::Xml,
                    _ => document::Format::Json,
                };
                let aliases = unit.filter_aliases();
                let counters =
                    document::export(format, units, doc_unit, aliases, input, filter, &tx).await?;
                ExtractSummary {
                    counters,
                    failures: Vec::new(),
                }
            }
        };

        if !summary.failures.is_empty() {
            warn!(
                "Extraction finished with {} failed queries",
                summary.failures.len()
            );
        }
        info!(
            "Extraction finished: {} seen, {} passed",
            summary.counters.seen, summary.counters.passed
        );
        Ok(summary)
    }
}
