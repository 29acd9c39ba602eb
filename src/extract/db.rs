//! Table-backed extraction with recursive detail and reference lookups.

use super::{Counters, ExtractError, QueryFailure};
use ei_connect::{DbConnection, DbProvider, Params, Row};
use ei_schema::{DbUnit, Filter, FilterValue, OutputMode, UnitExtractSpec};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, warn};

/// Generated depth column of hierarchical queries; never projected.
pub const HIERARCHY_LEVEL: &str = "ei_level";

const DETAILS_KEY: &str = "#details";
const REFERENCES_KEY: &str = "#references";

/// Build the select statement for `unit` under `filter`.
///
/// Filter columns must already be translated through the unit's aliases.
/// For hierarchical units the filter only restricts the root rows.
pub fn build_select(unit: &DbUnit, filter: &Filter) -> (String, Params) {
    let mut predicates = Vec::new();
    let mut params = Params::new();
    for (column, condition) in filter.iter() {
        let name = param_name(column);
        match condition {
            FilterValue::Scalar(Value::Null) => predicates.push(format!("{column} is null")),
            FilterValue::Scalar(value) => {
                predicates.push(format!("{column} = :{name}"));
                params.insert(name, value.clone());
            }
            FilterValue::Set(values) => {
                predicates.push(format!("{column} = any(:{name})"));
                params.insert(name, Value::Array(values.clone()));
            }
        }
    }

    let table = &unit.table;

    // Tree walks are ordered by level alone; a declared sort is not applied
    let sql = match &unit.hierarchykey {
        Some(hierarchykey) => {
            if unit.sort.is_some() {
                debug!("Ignoring sort of hierarchical table {table}");
            }
            predicates.push(format!("{hierarchykey} is null"));
            format!(
                "with recursive tree as (\
                 select t.*, 1 as {HIERARCHY_LEVEL} from {table} t where {roots} \
                 union all \
                 select c.*, tree.{HIERARCHY_LEVEL} + 1 from {table} c \
                 join tree on tree.{pk} = c.{hierarchykey}\
                 ) select * from tree order by {HIERARCHY_LEVEL}",
                roots = predicates.join(" and "),
                pk = unit.pk,
            )
        }
        None => {
            let mut sql = format!("select * from {table}");
            if !predicates.is_empty() {
                sql.push_str(" where ");
                sql.push_str(&predicates.join(" and "));
            }
            if let Some(sort) = &unit.sort {
                sql.push_str(" order by ");
                sql.push_str(&sort.order_by());
            }
            sql
        }
    };
    (sql, params)
}

/// Placeholder name for a (possibly qualified) column.
fn param_name(column: &str) -> String {
    column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Declared fields of `row`, renamed; every column when none are declared.
fn project(unit: &DbUnit, row: &Row) -> Map<String, Value> {
    if unit.fields.is_empty() {
        let mut record = row.clone();
        record.remove(HIERARCHY_LEVEL);
        return record;
    }
    unit.fields
        .iter()
        .map(|field| {
            let value = row.get(&field.column).cloned().unwrap_or(Value::Null);
            (field.output_name().to_string(), value)
        })
        .collect()
}

/// Recursive walker over `db` units sharing one lazily acquired connection.
pub(crate) struct DbWalker<'a, P: DbProvider> {
    units: &'a BTreeMap<String, UnitExtractSpec>,
    provider: &'a P,
    connection: Option<P::Connection>,
    failures: Vec<QueryFailure>,
}

impl<'a, P: DbProvider> DbWalker<'a, P> {
    pub(crate) fn new(units: &'a BTreeMap<String, UnitExtractSpec>, provider: &'a P) -> Self {
        Self {
            units,
            provider,
            connection: None,
            failures: Vec::new(),
        }
    }

    /// Emit every row of the top-level unit downstream.
    pub(crate) async fn export(
        &mut self,
        name: &'a str,
        unit: &'a DbUnit,
        filter: &Filter,
        tx: &Sender<Value>,
    ) -> Result<Counters, ExtractError> {
        let filter = filter.translate(&unit.filter);
        let rows = self.query_unit(name, unit, &filter).await?;
        let mut counters = Counters::default();
        for row in rows {
            let record = self.build_record(name, unit, &row).await?;
            counters.seen += 1;
            tx.send(record).await.map_err(|_| ExtractError::Closed)?;
            counters.passed += 1;
        }
        Ok(counters)
    }

    /// Give the connection back, if one was acquired.
    pub(crate) async fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.release().await {
                warn!("Failed to release extraction connection: {e:#}");
            }
        }
    }

    pub(crate) fn into_failures(self) -> Vec<QueryFailure> {
        self.failures
    }

    /// Look up a nested unit; undeclared or non-table units are skipped.
    fn lookup(&self, name: &str, role: &str) -> Option<&'a DbUnit> {
        match self.units.get(name) {
            Some(UnitExtractSpec::Db(unit)) => Some(unit),
            Some(other) => {
                warn!(
                    "{role} unit '{name}' is a {} unit; only db units can be nested",
                    other.kind()
                );
                None
            }
            None => {
                warn!("{role} unit '{name}' is not declared in the schema");
                None
            }
        }
    }

    /// Rows of `unit`; a failed query yields none and is recorded.
    async fn query_unit(
        &mut self,
        name: &str,
        unit: &DbUnit,
        filter: &Filter,
    ) -> Result<Vec<Row>, ExtractError> {
        let (sql, params) = build_select(unit, filter);
        if self.connection.is_none() {
            let connection = self
                .provider
                .connect()
                .await
                .map_err(ExtractError::Connect)?;
            self.connection = Some(connection);
        }
        let Some(connection) = self.connection.as_mut() else {
            return Ok(Vec::new());
        };

        debug!("Querying unit '{name}': {sql}");
        match connection.query(&sql, &params).await {
            Ok(result) => Ok(result.data),
            Err(e) => {
                error!("Failed to extract unit '{name}': {e:#}");
                self.failures.push(QueryFailure {
                    unit: name.to_string(),
                    message: format!("{e:#}"),
                });
                Ok(Vec::new())
            }
        }
    }

    /// Collected records of a nested unit.
    fn resolve<'s>(
        &'s mut self,
        name: &'a str,
        unit: &'a DbUnit,
        filter: Filter,
    ) -> BoxFuture<'s, Result<Vec<Value>, ExtractError>> {
        Box::pin(async move {
            let rows = self.query_unit(name, unit, &filter).await?;
            let mut records = Vec::with_capacity(rows.len());
            for row in &rows {
                records.push(self.build_record(name, unit, row).await?);
            }
            Ok(records)
        })
    }

    /// Project a row and attach its details and references.
    async fn build_record(
        &mut self,
        name: &'a str,
        unit: &'a DbUnit,
        row: &Row,
    ) -> Result<Value, ExtractError> {
        let mut record = project(unit, row);

        let mut details = Vec::new();
        let own_key = row.get(&unit.pk).filter(|key| !key.is_null());
        for detail in &unit.details {
            let Some(detail_unit) = self.lookup(detail, "Detail") else {
                continue;
            };
            let Some(parentkey) = detail_unit.parentkey.as_deref() else {
                warn!("Detail unit '{detail}' declares no parentkey, skipping");
                continue;
            };
            let Some(key) = own_key else {
                continue;
            };
            let filter = Filter::single(parentkey, key.clone());
            details.extend(self.resolve(detail, detail_unit, filter).await?);
        }
        if !details.is_empty() {
            record.insert(DETAILS_KEY.to_string(), Value::Array(details));
        }

        let mut references = Vec::new();
        for reference in &unit.references {
            let foreign_key = match row.get(&reference.field) {
                None | Some(Value::Null) => continue,
                Some(value) => value.clone(),
            };
            let Some(referenced) = self.lookup(&reference.table, "Reference") else {
                continue;
            };
            let filter = Filter::single(referenced.pk.clone(), foreign_key);
            references.extend(self.resolve(&reference.table, referenced, filter).await?);
        }
        if !references.is_empty() {
            record.insert(REFERENCES_KEY.to_string(), Value::Array(references));
        }

        Ok(match unit.output {
            OutputMode::Named => {
                let mut named = Map::new();
                named.insert(name.to_string(), Value::Object(record));
                Value::Object(named)
            }
            OutputMode::Plain => Value::Object(record),
        })
    }
}
