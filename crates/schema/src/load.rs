//! Load strategy definitions.

use crate::{AddressMode, ReferenceSpec, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Load strategies a schema may declare.
pub const LOAD_TYPES: &[&str] = &["jsonString", "db", "execSqlArray", "dbcopyload", "console"];

/// The `load` section: one strategy per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LoadSpec {
    /// Pretty-printed JSON array text
    #[serde(rename = "jsonString")]
    JsonString,
    /// Transactional upsert into the database
    #[serde(rename = "db")]
    Db(UnitsLoad),
    /// Collected `{sql, params}` statements, not executed
    #[serde(rename = "execSqlArray")]
    ExecSqlArray(UnitsLoad),
    /// Bulk `COPY ... FROM STDIN` into one table
    #[serde(rename = "dbcopyload")]
    DbCopyLoad(CopyLoad),
    /// Records printed to stdout
    #[serde(rename = "console")]
    Console,
}

impl LoadSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadSpec::JsonString => "jsonString",
            LoadSpec::Db(_) => "db",
            LoadSpec::ExecSqlArray(_) => "execSqlArray",
            LoadSpec::DbCopyLoad(_) => "dbcopyload",
            LoadSpec::Console => "console",
        }
    }

    /// Unit table for the upsert-based strategies.
    pub fn units(&self) -> Option<&UnitsLoad> {
        match self {
            LoadSpec::Db(units) | LoadSpec::ExecSqlArray(units) => Some(units),
            _ => None,
        }
    }
}

/// Unit addressing plus per-unit targets for `db` and `execSqlArray`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUnitsLoad", into = "RawUnitsLoad")]
pub struct UnitsLoad {
    /// Where a record names its unit
    pub unit_field: AddressMode,
    /// Where a record carries its column values
    pub unit_data: AddressMode,
    pub units: BTreeMap<String, UnitLoadSpec>,
}

#[derive(Serialize, Deserialize)]
struct RawUnitsLoad {
    #[serde(rename = "unitField", default = "default_unit_field")]
    unit_field: String,
    #[serde(rename = "unitData", default = "default_unit_data")]
    unit_data: String,
    #[serde(default)]
    units: BTreeMap<String, UnitLoadSpec>,
}

fn default_unit_field() -> String {
    "$0".to_string()
}

fn default_unit_data() -> String {
    ":$0".to_string()
}

impl TryFrom<RawUnitsLoad> for UnitsLoad {
    type Error = SchemaError;

    fn try_from(raw: RawUnitsLoad) -> Result<Self, Self::Error> {
        Ok(Self {
            unit_field: AddressMode::parse_unit_field(&raw.unit_field)?,
            unit_data: AddressMode::parse_unit_data(&raw.unit_data)?,
            units: raw.units,
        })
    }
}

impl From<UnitsLoad> for RawUnitsLoad {
    fn from(load: UnitsLoad) -> Self {
        Self {
            unit_field: load.unit_field.to_rule("$"),
            unit_data: load.unit_data.to_rule(":$"),
            units: load.units,
        }
    }
}

/// Target kinds for a load unit; only `db` units are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitLoadKind {
    #[default]
    Db,
    #[serde(other)]
    Other,
}

/// Upsert target for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitLoadSpec {
    #[serde(rename = "type", default)]
    pub kind: UnitLoadKind,

    pub tablename: String,

    /// Primary key column, returned by every upsert
    pub pk: String,

    /// Conflict target columns
    #[serde(default)]
    pub uk: Vec<String>,

    /// Columns written from the record
    #[serde(default)]
    pub fields: Vec<String>,

    /// Column receiving the parent record's key when loaded as a detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parentkey: Option<String>,

    /// Self-referencing parent column tracked through key remapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchykey: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferenceSpec>,
}

/// Bulk-copy target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyLoad {
    /// Target table, optionally `schema.table`
    pub loadtable: String,

    /// Column order of each copied line
    pub fields: Vec<String>,

    /// Procedure called with `(schema, table)` before the copy starts
    #[serde(rename = "beforeHook", default, skip_serializing_if = "Option::is_none")]
    pub before_hook: Option<String>,

    /// Procedure called after the copy channel is closed
    #[serde(rename = "afterHook", default, skip_serializing_if = "Option::is_none")]
    pub after_hook: Option<String>,
}

impl CopyLoad {
    /// `(schema, table)` of the load table; unqualified names live in `public`.
    pub fn schema_and_table(&self) -> (&str, &str) {
        match self.loadtable.split_once('.') {
            Some((schema, table)) => (schema, table),
            None => ("public", self.loadtable.as_str()),
        }
    }

    /// Keys of the bulk-load hooks this target leaves unset.
    pub fn missing_hooks(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.before_hook.is_none() {
            missing.push("beforeHook");
        }
        if self.after_hook.is_none() {
            missing.push("afterHook");
        }
        missing
    }
}
