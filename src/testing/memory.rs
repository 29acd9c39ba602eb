//! In-memory database provider.
//!
//! [`MemoryDb`] records every call made through its connections and answers
//! queries from registered responders. Inserts with a `returning` clause
//! that no responder claims return the record's own key, or a fresh
//! surrogate key when [`MemoryDb::with_surrogate_keys`] is set.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ei_connect::{CopyIn, DbConnection, DbProvider, Params, QueryResult, Row};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Responder = dyn Fn(&str, &Params) -> Result<Option<QueryResult>> + Send + Sync;

/// One call observed by the database.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Connect,
    Query { sql: String, params: Params },
    Begin,
    Commit,
    Rollback,
    Procedure { name: String, args: Vec<Value> },
    CopyStart { table: String, columns: Vec<String> },
    CopyLine(String),
    CopyEnd,
    Release,
}

#[derive(Default)]
struct State {
    log: Vec<LogEntry>,
    responders: Vec<Arc<Responder>>,
    surrogate_from: Option<i64>,
    fail_connect: bool,
}

/// Shared in-memory database; clones observe the same state.
#[derive(Clone, Default)]
pub struct MemoryDb {
    state: Arc<Mutex<State>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer statements with `responder`; the first responder returning
    /// `Some` wins, in registration order.
    pub fn on_query(
        self,
        responder: impl Fn(&str, &Params) -> Result<Option<QueryResult>> + Send + Sync + 'static,
    ) -> Self {
        self.lock().responders.push(Arc::new(responder));
        self
    }

    /// Serve `select * from <table>` from `rows`, keeping the rows whose
    /// columns equal every bound parameter (arrays act as sets).
    pub fn with_table(self, table: &str, rows: Vec<Value>) -> Self {
        let prefix = format!("select * from {table}");
        let rows: Vec<Row> = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect();
        self.on_query(move |sql, params| {
            let matches_table = sql
                .strip_prefix(&prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '));
            if !matches_table {
                return Ok(None);
            }
            let data = rows
                .iter()
                .filter(|row| {
                    params.iter().all(|(column, expected)| {
                        let actual = row.get(column).unwrap_or(&Value::Null);
                        match expected {
                            Value::Array(set) => set.contains(actual),
                            value => value == actual,
                        }
                    })
                })
                .cloned()
                .collect();
            Ok(Some(QueryResult::new(data)))
        })
    }

    /// Fail every statement containing `fragment`.
    pub fn fail_on(self, fragment: &str) -> Self {
        let fragment = fragment.to_string();
        self.on_query(move |sql, _| {
            if sql.contains(&fragment) {
                Err(anyhow!("simulated failure on '{fragment}'"))
            } else {
                Ok(None)
            }
        })
    }

    /// Unclaimed inserts return consecutive keys starting at `first`.
    pub fn with_surrogate_keys(self, first: i64) -> Self {
        self.lock().surrogate_from = Some(first);
        self
    }

    /// Make every connection attempt fail.
    pub fn refuse_connections(self) -> Self {
        self.lock().fail_connect = true;
        self
    }

    pub fn log(&self) -> Vec<LogEntry> {
        self.lock().log.clone()
    }

    /// SQL text of every executed statement, in order.
    pub fn queries(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Query { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Statements together with their parameters.
    pub fn statements(&self) -> Vec<(String, Params)> {
        self.lock()
            .log
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Query { sql, params } => Some((sql.clone(), params.clone())),
                _ => None,
            })
            .collect()
    }

    /// Lines written through copy channels.
    pub fn copied_lines(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::CopyLine(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &LogEntry) -> usize {
        self.lock().log.iter().filter(|entry| *entry == wanted).count()
    }

    fn record(&self, entry: LogEntry) {
        self.lock().log.push(entry);
    }

    fn answer(&self, sql: &str, params: &Params) -> Result<QueryResult> {
        let responders = self.lock().responders.clone();
        for responder in responders {
            if let Some(result) = responder(sql, params)? {
                return Ok(result);
            }
        }
        Ok(self.default_answer(sql, params))
    }

    fn default_answer(&self, sql: &str, params: &Params) -> QueryResult {
        let returning = sql
            .starts_with("insert")
            .then(|| sql.rsplit_once(" returning "))
            .flatten()
            .map(|(_, column)| column.trim().to_string());
        let Some(pk) = returning else {
            return QueryResult::default();
        };
        let mut state = self.lock();
        let key = match state.surrogate_from.as_mut() {
            Some(next) => {
                let key = *next;
                *next += 1;
                json!(key)
            }
            None => params.get(&pk).cloned().unwrap_or(Value::Null),
        };
        let mut row = Row::new();
        row.insert(pk, key);
        QueryResult::new(vec![row])
    }
}

#[async_trait]
impl DbProvider for MemoryDb {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        if self.lock().fail_connect {
            return Err(anyhow!("connection refused"));
        }
        self.record(LogEntry::Connect);
        Ok(MemoryConnection { db: self.clone() })
    }
}

pub struct MemoryConnection {
    db: MemoryDb,
}

#[async_trait]
impl DbConnection for MemoryConnection {
    type Copy = MemoryCopy;

    async fn query(&mut self, sql: &str, params: &Params) -> Result<QueryResult> {
        self.db.record(LogEntry::Query {
            sql: sql.to_string(),
            params: params.clone(),
        });
        self.db.answer(sql, params)
    }

    async fn begin(&mut self) -> Result<()> {
        self.db.record(LogEntry::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.db.record(LogEntry::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.db.record(LogEntry::Rollback);
        Ok(())
    }

    async fn call_procedure(&mut self, name: &str, args: &[Value]) -> Result<()> {
        self.db.record(LogEntry::Procedure {
            name: name.to_string(),
            args: args.to_vec(),
        });
        Ok(())
    }

    async fn copy_in(&mut self, table: &str, columns: &[String]) -> Result<MemoryCopy> {
        self.db.record(LogEntry::CopyStart {
            table: table.to_string(),
            columns: columns.to_vec(),
        });
        Ok(MemoryCopy {
            db: self.db.clone(),
            rows: 0,
        })
    }

    async fn release(self) -> Result<()> {
        self.db.record(LogEntry::Release);
        Ok(())
    }
}

pub struct MemoryCopy {
    db: MemoryDb,
    rows: u64,
}

#[async_trait]
impl CopyIn for MemoryCopy {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.db.record(LogEntry::CopyLine(line.to_string()));
        self.rows += 1;
        Ok(())
    }

    async fn finish(self) -> Result<u64> {
        self.db.record(LogEntry::CopyEnd);
        Ok(self.rows)
    }
}
