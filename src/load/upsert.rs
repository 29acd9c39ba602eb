//! Recursive upsert of records and their `#details` / `#references`.

use super::hierarchy::{same_key, HierarchyMap};
use super::LoadError;
use ei_connect::{DbConnection, Params};
use ei_schema::{AddressMode, UnitLoadKind, UnitLoadSpec, UnitsLoad};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

const DETAILS_KEY: &str = "#details";
const REFERENCES_KEY: &str = "#references";

/// A statement collected instead of executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Params,
}

/// Where generated statements go.
pub(crate) enum StatementSink<'s, C> {
    Execute(&'s mut C),
    Collect(&'s mut Vec<SqlStatement>),
}

/// `insert ... on conflict (uk) do update ... returning pk` over `columns`.
///
/// Units without unique-key columns get a plain insert.
pub fn upsert_sql(unit: &UnitLoadSpec, columns: &[String]) -> String {
    let placeholders: Vec<String> = columns.iter().map(|c| format!(":{c}")).collect();
    let mut sql = format!(
        "insert into {} ({}) values ({})",
        unit.tablename,
        columns.join(", "),
        placeholders.join(", ")
    );
    if !unit.uk.is_empty() {
        let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = :{c}")).collect();
        sql.push_str(&format!(
            " on conflict ({}) do update set {}",
            unit.uk.join(", "),
            assignments.join(", ")
        ));
    }
    sql.push_str(&format!(" returning {}", unit.pk));
    sql
}

fn add_column(columns: &mut Vec<String>, column: &str) {
    if !columns.iter().any(|c| c == column) {
        columns.push(column.to_string());
    }
}

/// Name of the unit a record belongs to.
///
/// A positional rule names the unit by the Nth key itself, a named rule by
/// the string value of that property.
fn resolve_unit(rule: &AddressMode, record: &Map<String, Value>) -> Option<String> {
    match rule {
        AddressMode::ByPosition(_) => rule.key(record).map(str::to_string),
        AddressMode::ByName(name) => record.get(name).and_then(Value::as_str).map(str::to_string),
    }
}

fn take_records(data: &mut Map<String, Value>, key: &str) -> Vec<Map<String, Value>> {
    match data.remove(key) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(record) => Some(record),
                other => {
                    warn!("Ignoring non-object {key} entry: {other}");
                    None
                }
            })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!("Ignoring {key} that is not an array: {other}");
            Vec::new()
        }
    }
}

pub(crate) struct Upserter<'s, C> {
    spec: &'s UnitsLoad,
    sink: StatementSink<'s, C>,
    hierarchy: &'s mut HierarchyMap,
}

impl<'s, C: DbConnection> Upserter<'s, C> {
    pub(crate) fn new(
        spec: &'s UnitsLoad,
        sink: StatementSink<'s, C>,
        hierarchy: &'s mut HierarchyMap,
    ) -> Self {
        Self {
            spec,
            sink,
            hierarchy,
        }
    }

    /// Upsert `record` and everything nested in it.
    ///
    /// Returns the key of the written row: the key the store returned when
    /// executing, the record's own key when collecting. Records of unknown
    /// or non-`db` units are skipped and yield `None`.
    pub(crate) fn upsert<'f>(
        &'f mut self,
        mut record: Map<String, Value>,
        parent_key: Option<Value>,
    ) -> BoxFuture<'f, Result<Option<Value>, LoadError>> {
        Box::pin(async move {
            let spec: &'s UnitsLoad = self.spec;

            // 1. resolve the unit and its payload
            let Some(unit_name) = resolve_unit(&spec.unit_field, &record) else {
                warn!("Record has no unit at {:?}, skipping", spec.unit_field);
                return Ok(None);
            };
            let Some(unit) = spec.units.get(&unit_name) else {
                debug!("Unit '{unit_name}' has no load target, skipping");
                return Ok(None);
            };
            if unit.kind != UnitLoadKind::Db {
                debug!("Unit '{unit_name}' is not a db unit, skipping");
                return Ok(None);
            }
            let data_key = spec.unit_data.key(&record).map(str::to_string);
            let mut data = match data_key.and_then(|key| record.remove(&key)) {
                Some(Value::Object(data)) => data,
                _ => {
                    warn!("Record of unit '{unit_name}' carries no object payload, skipping");
                    return Ok(None);
                }
            };
            let mut columns = unit.fields.clone();

            // 2. parent key
            if let Some(parent_key) = parent_key {
                match &unit.parentkey {
                    Some(parentkey) => {
                        data.insert(parentkey.clone(), parent_key);
                        add_column(&mut columns, parentkey);
                    }
                    None => {
                        warn!("Unit '{unit_name}' is loaded as a detail but declares no parentkey")
                    }
                }
            }

            // 3. hierarchy remap
            if let Some(hierarchykey) = &unit.hierarchykey {
                let remapped = data
                    .get(hierarchykey)
                    .and_then(|old| self.hierarchy.lookup(&unit_name, old))
                    .cloned();
                if let Some(new_parent) = remapped {
                    data.insert(hierarchykey.clone(), new_parent);
                    add_column(&mut columns, hierarchykey);
                }
            }

            // 4. references first
            for reference in take_records(&mut data, REFERENCES_KEY) {
                let referenced_unit = resolve_unit(&spec.unit_field, &reference);
                let key = self.upsert(reference, None).await?;
                let declaration = referenced_unit.as_deref().and_then(|name| {
                    unit.references.iter().find(|declared| declared.table == name)
                });
                match (declaration, key) {
                    (Some(declared), Some(key)) => {
                        data.insert(declared.field.clone(), key);
                        add_column(&mut columns, &declared.field);
                    }
                    (Some(_), None) => {}
                    (None, _) => warn!(
                        "Unit '{unit_name}' declares no reference to {:?}, skipping",
                        referenced_unit
                    ),
                }
            }

            // 5. statement
            let sql = upsert_sql(unit, &columns);
            let params: Params = columns
                .iter()
                .map(|column| {
                    let value = data.get(column).cloned().unwrap_or(Value::Null);
                    (column.clone(), value)
                })
                .collect();
            let own_key = data.get(&unit.pk).cloned().filter(|key| !key.is_null());

            // 6. execute or collect
            let key = match &mut self.sink {
                StatementSink::Execute(connection) => {
                    debug!("Upserting into {}", unit.tablename);
                    let result = connection
                        .query(&sql, &params)
                        .await
                        .map_err(LoadError::Transaction)?;
                    let returned = result
                        .first()
                        .and_then(|row| row.get(&unit.pk))
                        .cloned()
                        .filter(|key| !key.is_null());
                    if unit.hierarchykey.is_some() {
                        if let (Some(old), Some(new)) = (&own_key, &returned) {
                            if !same_key(old, new) {
                                self.hierarchy.record(&unit_name, old, new.clone());
                            }
                        }
                    }
                    returned.or(own_key)
                }
                StatementSink::Collect(statements) => {
                    statements.push(SqlStatement { sql, params });
                    own_key
                }
            };

            // 7. details, one after another
            for detail in take_records(&mut data, DETAILS_KEY) {
                self.upsert(detail, key.clone()).await?;
            }

            Ok(key)
        })
    }
}
