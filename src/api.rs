//! Export and import entry points.
//!
//! Both directions run the same pipeline. Export extracts from the store and
//! writes whatever the load strategy renders into a file. Import reads a
//! document file and discards the rendered text, keeping only the counts.

use crate::extract::{Extractor, QueryFailure};
use crate::load::Loader;
use crate::pipeline::{self, PipelineError, DEFAULT_PIPELINE_DEPTH};
use ei_connect::DbProvider;
use ei_schema::{Filter, Schema};
use serde::Serialize;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{BufReader, BufWriter};
use tracing::info;

/// Counts reported by an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    /// Records read from the document
    pub extracted: u64,
    /// Records that passed the filter and reached the loader
    pub processed: u64,
}

/// Outcome of an export.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub extracted: u64,
    pub processed: u64,
    /// Swallowed query failures of nested lookups
    pub failures: Vec<QueryFailure>,
}

/// Shared context of export and import runs.
pub struct Session<P: DbProvider> {
    provider: P,
    pipeline_depth: usize,
}

impl<P: DbProvider> Session<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
        }
    }

    pub fn with_pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = depth.max(1);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Extract per `schema` and write the rendered load output to `path`.
    pub async fn export_by_schema(
        &self,
        schema: &Schema,
        path: impl AsRef<Path>,
        filter: Option<&Filter>,
    ) -> Result<RunSummary, PipelineError> {
        let path = path.as_ref();
        info!("Exporting unit '{}' to {}", schema.main, path.display());
        let filter = filter.cloned().unwrap_or_default();
        let mut loader = Loader::new(schema.load_spec()?, &self.provider);
        let extractor = Extractor::new(schema, &self.provider);

        let mut output = BufWriter::new(File::create(path).await?);
        let summary = pipeline::run(
            extractor,
            &mut loader,
            &filter,
            &mut output,
            self.pipeline_depth,
        )
        .await?;

        Ok(RunSummary {
            extracted: summary.counters.seen,
            processed: summary.counters.passed,
            failures: summary.failures,
        })
    }

    pub async fn export_by_schema_file(
        &self,
        schema_path: impl AsRef<Path>,
        path: impl AsRef<Path>,
        filter: Option<&Filter>,
    ) -> Result<RunSummary, PipelineError> {
        let schema = Schema::from_file(schema_path)?;
        self.export_by_schema(&schema, path, filter).await
    }

    /// Read the document at `path` per `schema` and load it.
    pub async fn import_by_schema(
        &self,
        schema: &Schema,
        path: impl AsRef<Path>,
        filter: Option<&Filter>,
    ) -> Result<ImportCounts, PipelineError> {
        let path = path.as_ref();
        info!("Importing {} as unit '{}'", path.display(), schema.main);
        let filter = filter.cloned().unwrap_or_default();
        let mut loader = Loader::new(schema.load_spec()?, &self.provider);
        let input = BufReader::new(File::open(path).await?);
        let extractor = Extractor::new(schema, &self.provider).with_input(input);

        let mut output = tokio::io::sink();
        let summary = pipeline::run(
            extractor,
            &mut loader,
            &filter,
            &mut output,
            self.pipeline_depth,
        )
        .await?;

        Ok(ImportCounts {
            extracted: summary.counters.seen,
            processed: summary.counters.passed,
        })
    }

    pub async fn import_by_schema_file(
        &self,
        schema_path: impl AsRef<Path>,
        path: impl AsRef<Path>,
        filter: Option<&Filter>,
    ) -> Result<ImportCounts, PipelineError> {
        let schema = Schema::from_file(schema_path)?;
        self.import_by_schema(&schema, path, filter).await
    }
}
