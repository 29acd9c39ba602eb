//! Schema documents for ei-sync runs.
//!
//! A schema names its root unit (`main`) and describes how records are
//! extracted (`extract`, a map of unit name to leaf definition) and how they
//! are loaded (`load`, one strategy per run). Both sections are optional at
//! parse time; each engine checks for the section it needs.
//!
//! ```json
//! {
//!   "main": "orders",
//!   "extract": {
//!     "orders": {"type": "db", "table": "orders", "pk": "id",
//!                "fields": ["id", "code"], "details": ["lines"], "output": "named"},
//!     "lines":  {"type": "db", "table": "order_lines", "pk": "id",
//!                "parentkey": "order_id", "fields": ["id", "qty"], "output": "named"}
//!   },
//!   "load": {"type": "jsonString"}
//! }
//! ```
//!
//! Documents wrapped as `{"schema": {...}}` are accepted as well.

mod address;
mod error;
mod extract;
mod filter;
mod load;

pub use address::AddressMode;
pub use error::SchemaError;
pub use extract::{
    DbUnit, DocumentUnit, FieldSpec, OutputMode, ReferenceSpec, SortSpec, UnitExtractSpec,
    EXTRACT_TYPES,
};
pub use filter::{Filter, FilterValue};
pub use load::{CopyLoad, LoadSpec, UnitLoadKind, UnitLoadSpec, UnitsLoad, LOAD_TYPES};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// A parsed schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Root unit of every run
    pub main: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<BTreeMap<String, UnitExtractSpec>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadSpec>,
}

impl Schema {
    /// Build a schema from a JSON value, unwrapping a `schema` envelope.
    ///
    /// Leaf and strategy types are checked before shaping so that an unknown
    /// type reports which unit declared it.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let mut value = value;
        if let Some(inner) = value.as_object_mut().and_then(|o| o.remove("schema")) {
            value = inner;
        }
        let document = value.as_object().ok_or(SchemaError::NotAnObject)?;

        if let Some(extract) = document.get("extract").and_then(Value::as_object) {
            for (unit, spec) in extract {
                if let Some(kind) = spec.get("type").and_then(Value::as_str) {
                    if !EXTRACT_TYPES.contains(&kind) {
                        return Err(SchemaError::UnsupportedExtractType {
                            unit: unit.clone(),
                            kind: kind.to_string(),
                        });
                    }
                }
            }
        }
        if let Some(kind) = document
            .get("load")
            .and_then(|load| load.get("type"))
            .and_then(Value::as_str)
        {
            if !LOAD_TYPES.contains(&kind) {
                return Err(SchemaError::UnsupportedLoadType(kind.to_string()));
            }
        }

        let schema: Schema = serde_json::from_value(value)?;
        tracing::debug!(
            "Loaded schema with main unit '{}' ({} extract units, load: {})",
            schema.main,
            schema.extract.as_ref().map_or(0, BTreeMap::len),
            schema.load.as_ref().map_or("none", LoadSpec::kind)
        );
        Ok(schema)
    }

    pub fn from_json_str(s: &str) -> Result<Self, SchemaError> {
        Self::from_value(serde_json::from_str(s)?)
    }

    /// Read and parse a JSON schema file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn extract_units(&self) -> Result<&BTreeMap<String, UnitExtractSpec>, SchemaError> {
        self.extract
            .as_ref()
            .ok_or(SchemaError::MissingSection("extract"))
    }

    pub fn load_spec(&self) -> Result<&LoadSpec, SchemaError> {
        self.load.as_ref().ok_or(SchemaError::MissingSection("load"))
    }

    /// Look up an extract unit by name.
    pub fn extract_unit(&self, name: &str) -> Option<&UnitExtractSpec> {
        self.extract.as_ref().and_then(|units| units.get(name))
    }
}
