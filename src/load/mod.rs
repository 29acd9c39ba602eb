//! Schema-driven loading
//!
//! A [`Loader`] consumes the records produced by an extraction run and
//! applies the schema's load strategy to each of them. Strategies that
//! render text (`jsonString`, `execSqlArray`) hand the rendered chunks back
//! to the caller, which writes them to the run's output. Strategies that
//! write to the store (`db`, `dbcopyload`) hold one connection and one
//! transaction for the whole run.
//!
//! The lifecycle is `prepare` → `process`* → `finalize`. Any failure aborts
//! the run: the open copy channel is dropped, the transaction rolled back
//! and the connection released.

mod copy;
mod hierarchy;
mod upsert;

pub use copy::{copy_line, COPY_NULL};
pub use hierarchy::HierarchyMap;
pub use upsert::{upsert_sql, SqlStatement};

use ei_connect::{CopyIn, DbConnection, DbProvider};
use ei_schema::{LoadSpec, SchemaError};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use upsert::{StatementSink, Upserter};

/// Opening marker of rendered sequences.
pub const SEQUENCE_OPEN: &str = "[\n";
/// Closing marker of rendered sequences.
pub const SEQUENCE_CLOSE: &str = "\n]";

const ITEM_SEPARATOR: &str = ",\n";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Failed to acquire a database connection: {0:#}")]
    Connect(anyhow::Error),

    #[error("Transaction failed: {0:#}")]
    Transaction(anyhow::Error),

    #[error("Bulk copy failed: {0:#}")]
    Copy(anyhow::Error),

    /// A store strategy was used before `prepare` or after `abort`
    #[error("No open connection")]
    NoConnection,

    #[error("Failed to render record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Applies one load strategy to a stream of records.
pub struct Loader<'a, P: DbProvider> {
    spec: &'a LoadSpec,
    provider: &'a P,
    connection: Option<P::Connection>,
    copy: Option<<P::Connection as DbConnection>::Copy>,
    hierarchy: HierarchyMap,
    wrote_item: bool,
    processed: u64,
}

/// Tab-indented pretty JSON.
fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[derive(Serialize)]
struct StatementBatch<'s> {
    arr: &'s [SqlStatement],
}

impl<'a, P: DbProvider> Loader<'a, P> {
    pub fn new(spec: &'a LoadSpec, provider: &'a P) -> Self {
        Self {
            spec,
            provider,
            connection: None,
            copy: None,
            hierarchy: HierarchyMap::new(),
            wrote_item: false,
            processed: 0,
        }
    }

    /// Records handed to the strategy so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Surrogate keys remapped during this run.
    pub fn hierarchy(&self) -> &HierarchyMap {
        &self.hierarchy
    }

    /// Open the strategy. Returns the text that precedes the first record.
    pub async fn prepare(&mut self) -> Result<Option<String>, LoadError> {
        info!("Preparing {} load", self.spec.kind());
        match self.open().await {
            Ok(text) => Ok(text),
            Err(e) => {
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> Result<Option<String>, LoadError> {
        let spec = self.spec;
        match spec {
            LoadSpec::JsonString | LoadSpec::ExecSqlArray(_) => {
                Ok(Some(SEQUENCE_OPEN.to_string()))
            }
            LoadSpec::Console => Ok(None),
            LoadSpec::Db(_) => {
                let connection = self.connect().await?;
                connection.begin().await.map_err(LoadError::Transaction)?;
                Ok(None)
            }
            LoadSpec::DbCopyLoad(copy) => {
                for missing in copy.missing_hooks() {
                    warn!("Bulk load into {} runs without {missing}", copy.loadtable);
                }
                let connection = self.connect().await?;
                connection.begin().await.map_err(LoadError::Transaction)?;
                if let Some(hook) = &copy.before_hook {
                    let (schema, table) = copy.schema_and_table();
                    debug!("Calling before hook {hook}({schema}, {table})");
                    connection
                        .call_procedure(hook, &[Value::from(schema), Value::from(table)])
                        .await
                        .map_err(LoadError::Copy)?;
                }
                let channel = connection
                    .copy_in(&copy.loadtable, &copy.fields)
                    .await
                    .map_err(LoadError::Copy)?;
                self.copy = Some(channel);
                Ok(None)
            }
        }
    }

    async fn connect(&mut self) -> Result<&mut P::Connection, LoadError> {
        let connection = self.provider.connect().await.map_err(LoadError::Connect)?;
        Ok(self.connection.insert(connection))
    }

    /// Apply the strategy to one record. Returns the text rendered for it.
    pub async fn process(&mut self, record: Value) -> Result<Option<String>, LoadError> {
        match self.apply(record).await {
            Ok(text) => Ok(text),
            Err(e) => {
                error!("Load failed: {e}");
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn apply(&mut self, record: Value) -> Result<Option<String>, LoadError> {
        let spec = self.spec;
        let text = match spec {
            LoadSpec::JsonString => Some(self.item(pretty(&record)?)),
            LoadSpec::Console => {
                println!("{}", pretty(&record)?);
                None
            }
            LoadSpec::Db(units) => {
                let Value::Object(record) = record else {
                    warn!("Skipping non-object record");
                    return Ok(None);
                };
                let connection = self.connection.as_mut().ok_or(LoadError::NoConnection)?;
                Upserter::new(units, StatementSink::Execute(connection), &mut self.hierarchy)
                    .upsert(record, None)
                    .await?;
                None
            }
            LoadSpec::ExecSqlArray(units) => {
                let Value::Object(record) = record else {
                    warn!("Skipping non-object record");
                    return Ok(None);
                };
                let mut statements = Vec::new();
                Upserter::<P::Connection>::new(
                    units,
                    StatementSink::Collect(&mut statements),
                    &mut self.hierarchy,
                )
                .upsert(record, None)
                .await?;
                let batch = pretty(&StatementBatch { arr: &statements })?;
                Some(self.item(batch))
            }
            LoadSpec::DbCopyLoad(copy) => {
                let channel = self.copy.as_mut().ok_or(LoadError::NoConnection)?;
                channel
                    .write_line(&copy_line(&copy.fields, &record))
                    .await
                    .map_err(LoadError::Copy)?;
                None
            }
        };
        self.processed += 1;
        Ok(text)
    }

    fn item(&mut self, text: String) -> String {
        if std::mem::replace(&mut self.wrote_item, true) {
            format!("{ITEM_SEPARATOR}{text}")
        } else {
            text
        }
    }

    /// Close the strategy after the last record. Returns the closing text.
    pub async fn finalize(&mut self) -> Result<Option<String>, LoadError> {
        match self.close().await {
            Ok(text) => {
                info!("Load finished: {} records processed", self.processed);
                Ok(text)
            }
            Err(e) => {
                error!("Failed to finalize load: {e}");
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<Option<String>, LoadError> {
        let spec = self.spec;
        match spec {
            LoadSpec::JsonString | LoadSpec::ExecSqlArray(_) => {
                Ok(Some(SEQUENCE_CLOSE.to_string()))
            }
            LoadSpec::Console => Ok(None),
            LoadSpec::Db(_) => {
                let connection = self.connection.as_mut().ok_or(LoadError::NoConnection)?;
                connection.commit().await.map_err(LoadError::Transaction)?;
                self.release().await;
                if !self.hierarchy.is_empty() {
                    debug!("Remapped {} hierarchy keys", self.hierarchy.len());
                }
                Ok(None)
            }
            LoadSpec::DbCopyLoad(copy) => {
                let channel = self.copy.take().ok_or(LoadError::NoConnection)?;
                let rows = channel.finish().await.map_err(LoadError::Copy)?;
                info!("Copied {rows} rows into {}", copy.loadtable);
                let connection = self.connection.as_mut().ok_or(LoadError::NoConnection)?;
                if let Some(hook) = &copy.after_hook {
                    debug!("Calling after hook {hook}()");
                    connection
                        .call_procedure(hook, &[])
                        .await
                        .map_err(LoadError::Copy)?;
                }
                connection.commit().await.map_err(LoadError::Transaction)?;
                self.release().await;
                Ok(None)
            }
        }
    }

    async fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.release().await {
                warn!("Failed to release connection: {e:#}");
            }
        }
    }

    /// Drop the copy channel, roll back and release. Safe to call repeatedly.
    pub async fn abort(&mut self) {
        if self.copy.take().is_some() {
            debug!("Dropped open copy channel");
        }
        if let Some(connection) = self.connection.as_mut() {
            warn!("Rolling back {} load", self.spec.kind());
            if let Err(e) = connection.rollback().await {
                error!("Rollback failed: {e:#}");
            }
        }
        self.release().await;
    }
}
