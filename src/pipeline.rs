//! Extractor → loader pipeline.
//!
//! The extractor and the loader run concurrently on the current task,
//! connected by a bounded channel. The channel capacity is the pipeline
//! depth: the extractor suspends once that many records wait for the loader.

use crate::extract::{ExtractError, ExtractSummary, Extractor};
use crate::load::{LoadError, Loader};
use ei_connect::DbProvider;
use ei_schema::{Filter, SchemaError};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Records buffered between extractor and loader by default.
pub const DEFAULT_PIPELINE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// Run one extraction into one loader, writing rendered text to `output`.
///
/// On success the loader is finalized and `output` flushed. On failure the
/// loader is aborted; a load failure is reported in preference to the
/// extraction error it caused.
pub async fn run<P, W>(
    extractor: Extractor<'_, P>,
    loader: &mut Loader<'_, P>,
    filter: &Filter,
    output: &mut W,
    depth: usize,
) -> Result<ExtractSummary, PipelineError>
where
    P: DbProvider,
    W: AsyncWrite + Unpin,
{
    if let Some(text) = loader.prepare().await? {
        if let Err(e) = output.write_all(text.as_bytes()).await {
            loader.abort().await;
            return Err(e.into());
        }
    }

    let (tx, mut rx) = mpsc::channel(depth.max(1));
    debug!("Pipeline depth {}", depth.max(1));

    let producer = extractor.export(filter, tx);
    let sink = &mut *loader;
    let out = &mut *output;
    // Owns the receiver so that a failing consumer closes the channel and
    // stops the producer.
    let consumer = async move {
        while let Some(record) = rx.recv().await {
            if let Some(text) = sink.process(record).await? {
                out.write_all(text.as_bytes()).await?;
            }
        }
        Ok::<_, PipelineError>(())
    };
    let (extracted, consumed) = tokio::join!(producer, consumer);

    if let Err(e) = consumed {
        error!("Pipeline consumer failed: {e}");
        loader.abort().await;
        return Err(e);
    }
    let summary = match extracted {
        Ok(summary) => summary,
        Err(e) => {
            error!("Pipeline producer failed: {e}");
            loader.abort().await;
            return Err(e.into());
        }
    };

    if let Some(text) = loader.finalize().await? {
        output.write_all(text.as_bytes()).await?;
    }
    output.flush().await?;
    info!(
        "Pipeline finished: {} extracted, {} passed, {} loaded",
        summary.counters.seen,
        summary.counters.passed,
        loader.processed()
    );
    Ok(summary)
}
