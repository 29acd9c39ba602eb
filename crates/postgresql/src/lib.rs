//! PostgreSQL provider for ei-sync
//!
//! Implements the `ei-connect` provider contract on `tokio-postgres`:
//! named `:param` statements are compiled to positional parameters and
//! bound according to the types the server infers at prepare time, rows come
//! back as JSON objects, and bulk loads go through `COPY ... FROM STDIN`.

mod bind;
mod named;
mod row;

pub use bind::{bind_params, to_sql_param};
pub use named::{compile_named, CompiledSql};
pub use row::row_to_json;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use ei_connect::{CopyIn, DbConnection, DbProvider, Params, QueryResult};
use futures::SinkExt;
use serde_json::Value;
use std::pin::Pin;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, CopyInSink, NoTls};
use tracing::{debug, error, info};

/// Connects to one PostgreSQL server.
#[derive(Clone, Debug)]
pub struct PostgresProvider {
    connection_string: String,
}

impl PostgresProvider {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }
}

#[async_trait]
impl DbProvider for PostgresProvider {
    type Connection = PostgresConnection;

    async fn connect(&self) -> Result<PostgresConnection> {
        let (client, connection) = tokio_postgres::connect(&self.connection_string, NoTls)
            .await
            .context("Failed to connect to PostgreSQL")?;

        // Spawn connection handler
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {e}");
            }
        });
        debug!("Acquired PostgreSQL connection");

        Ok(PostgresConnection { client, connection })
    }
}

/// A live client plus the task driving its socket.
pub struct PostgresConnection {
    client: Client,
    connection: JoinHandle<()>,
}

impl PostgresConnection {
    /// Prepare, bind and run a statement, returning the raw rows.
    async fn run(&self, sql: &str, params: &Params) -> Result<Vec<tokio_postgres::Row>> {
        let compiled = compile_named(sql);
        debug!("Executing: {}", compiled.sql);

        let statement = self
            .client
            .prepare(&compiled.sql)
            .await
            .with_context(|| format!("Failed to prepare statement: {sql}"))?;
        let values = bind_params(&compiled.names, statement.params(), params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .map(|value| &**value as &(dyn ToSql + Sync))
            .collect();

        self.client
            .query(&statement, &refs)
            .await
            .with_context(|| format!("Failed to execute statement: {sql}"))
    }
}

#[async_trait]
impl DbConnection for PostgresConnection {
    type Copy = PostgresCopy;

    async fn query(&mut self, sql: &str, params: &Params) -> Result<QueryResult> {
        let rows = self.run(sql, params).await?;
        let data = rows
            .iter()
            .map(row_to_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult::new(data))
    }

    async fn begin(&mut self) -> Result<()> {
        self.client
            .batch_execute("BEGIN")
            .await
            .context("Failed to begin transaction")
    }

    async fn commit(&mut self) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .context("Failed to commit transaction")
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .context("Failed to roll back transaction")
    }

    async fn call_procedure(&mut self, name: &str, args: &[Value]) -> Result<()> {
        let mut params = Params::new();
        let mut placeholders = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let key = format!("arg{i}");
            placeholders.push(format!(":{key}"));
            params.insert(key, arg.clone());
        }
        let sql = format!("select {name}({})", placeholders.join(", "));
        info!("Calling {name} with {} argument(s)", args.len());
        // Procedure results are not decoded; hooks usually return void
        self.run(&sql, &params).await?;
        Ok(())
    }

    async fn copy_in(&mut self, table: &str, columns: &[String]) -> Result<PostgresCopy> {
        let sql = format!("COPY {table} ({}) FROM STDIN", columns.join(", "));
        debug!("Opening copy channel: {sql}");
        let sink = self
            .client
            .copy_in::<_, Bytes>(sql.as_str())
            .await
            .with_context(|| format!("Failed to open copy channel for {table}"))?;
        Ok(PostgresCopy {
            sink: Box::pin(sink),
        })
    }

    async fn release(self) -> Result<()> {
        drop(self.client);
        self.connection
            .await
            .context("PostgreSQL connection task failed")?;
        debug!("Released PostgreSQL connection");
        Ok(())
    }
}

/// An open `COPY FROM STDIN` channel.
pub struct PostgresCopy {
    sink: Pin<Box<CopyInSink<Bytes>>>,
}

#[async_trait]
impl CopyIn for PostgresCopy {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = String::with_capacity(line.len() + 1);
        data.push_str(line);
        data.push('\n');
        self.sink
            .send(Bytes::from(data))
            .await
            .context("Failed to write copy data")
    }

    async fn finish(mut self) -> Result<u64> {
        let rows = self
            .sink
            .as_mut()
            .finish()
            .await
            .context("Failed to finish copy")?;
        info!("Copied {rows} row(s)");
        Ok(rows)
    }
}
