//! Database provider contract.
//!
//! The extraction and load engines never talk to a driver directly. They
//! acquire a [`DbConnection`] from a [`DbProvider`], issue statements with
//! named `:param` placeholders, and stream bulk loads through [`CopyIn`].
//! Rows travel as JSON objects keyed by column name.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named statement parameters (`:name` in SQL text).
pub type Params = Map<String, Value>;

/// A result row keyed by column name.
pub type Row = Map<String, Value>;

/// Rows returned by a statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub data: Vec<Row>,
}

impl QueryResult {
    pub fn new(data: Vec<Row>) -> Self {
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.data.first()
    }
}

/// Source of scoped connections, carrying whatever credentials it needs.
#[async_trait]
pub trait DbProvider: Send + Sync {
    type Connection: DbConnection;

    /// Acquire a connection for one engine run.
    async fn connect(&self) -> Result<Self::Connection>;
}

/// A connection held by one engine for the duration of a run.
#[async_trait]
pub trait DbConnection: Send {
    type Copy: CopyIn;

    /// Execute a statement with named parameters and collect its rows.
    async fn query(&mut self, sql: &str, params: &Params) -> Result<QueryResult>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Call a stored procedure with positional arguments.
    async fn call_procedure(&mut self, name: &str, args: &[Value]) -> Result<()>;

    /// Open a `COPY <table> (<columns>) FROM STDIN` channel.
    async fn copy_in(&mut self, table: &str, columns: &[String]) -> Result<Self::Copy>;

    /// Return the connection to its provider.
    async fn release(self) -> Result<()>;
}

/// A line-oriented bulk-copy channel in COPY text format.
#[async_trait]
pub trait CopyIn: Send {
    /// Write one line; the trailing newline is added by the channel.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Close the channel, returning the number of rows the store accepted.
    async fn finish(self) -> Result<u64>;
}
