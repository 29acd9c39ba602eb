//! Extraction unit definitions.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Leaf types an extract unit may declare.
pub const EXTRACT_TYPES: &[&str] = &["db", "json", "xml"];

/// One named node of the `extract` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UnitExtractSpec {
    /// Rows of a database table.
    Db(DbUnit),
    /// Objects matched in a JSON document.
    Json(DocumentUnit),
    /// Elements matched in an XML document.
    Xml(DocumentUnit),
}

impl UnitExtractSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            UnitExtractSpec::Db(_) => "db",
            UnitExtractSpec::Json(_) => "json",
            UnitExtractSpec::Xml(_) => "xml",
        }
    }

    /// Filter alias map (`alias -> column`).
    pub fn filter_aliases(&self) -> &BTreeMap<String, String> {
        match self {
            UnitExtractSpec::Db(unit) => &unit.filter,
            UnitExtractSpec::Json(unit) | UnitExtractSpec::Xml(unit) => &unit.filter,
        }
    }

    /// Document path pattern, falling back to `!.*.<unit_name>`.
    pub fn path_pattern(&self, unit_name: &str) -> String {
        let declared = match self {
            UnitExtractSpec::Json(unit) | UnitExtractSpec::Xml(unit) => unit.path.as_deref(),
            UnitExtractSpec::Db(_) => None,
        };
        declared
            .map(str::to_string)
            .unwrap_or_else(|| format!("!.*.{unit_name}"))
    }

    pub fn as_db(&self) -> Option<&DbUnit> {
        match self {
            UnitExtractSpec::Db(unit) => Some(unit),
            _ => None,
        }
    }
}

/// A table-backed extract unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbUnit {
    /// Source table, optionally schema-qualified
    pub table: String,

    /// Primary key column
    pub pk: String,

    /// Column pointing at the parent row when this unit is a detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parentkey: Option<String>,

    /// Self-referencing parent column; turns the query into a recursive walk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchykey: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,

    /// Projected fields, in output order
    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    /// Filter aliases (`alias -> column`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, String>,

    /// Detail unit names, resolved per row
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,

    /// Related records embedded through a foreign key
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferenceSpec>,

    #[serde(default)]
    pub output: OutputMode,
}

/// A document-backed extract unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentUnit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Emit the single-key container around a match instead of the bare value
    #[serde(rename = "valueScoped", default)]
    pub value_scoped: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, String>,
}

/// `ORDER BY` columns: a single expression or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortSpec {
    One(String),
    Many(Vec<String>),
}

impl SortSpec {
    pub fn order_by(&self) -> String {
        match self {
            SortSpec::One(column) => column.clone(),
            SortSpec::Many(columns) => columns.join(","),
        }
    }
}

/// Whether a row is emitted bare or wrapped as `{unit_name: row}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Plain,
    Named,
}

/// A foreign-key reference to another unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSpec {
    /// Referenced unit name
    pub table: String,
    /// Foreign-key field on the referencing record
    pub field: String,
}

/// A projected column, optionally emitted under another name.
///
/// Declared either as `"column"` or as `{"column": "output_name"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawField", into = "RawField")]
pub struct FieldSpec {
    pub column: String,
    pub alias: Option<String>,
}

impl FieldSpec {
    pub fn column(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            alias: None,
        }
    }

    pub fn renamed(column: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            alias: Some(alias.into()),
        }
    }

    /// Name the value is emitted under.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawField {
    Column(String),
    Renamed(BTreeMap<String, String>),
}

impl TryFrom<RawField> for FieldSpec {
    type Error = SchemaError;

    fn try_from(raw: RawField) -> Result<Self, Self::Error> {
        match raw {
            RawField::Column(column) => Ok(FieldSpec::column(column)),
            RawField::Renamed(map) => {
                if map.len() != 1 {
                    return Err(SchemaError::InvalidField(map.len()));
                }
                let (column, alias) = map
                    .into_iter()
                    .next()
                    .ok_or(SchemaError::InvalidField(0))?;
                Ok(FieldSpec::renamed(column, alias))
            }
        }
    }
}

impl From<FieldSpec> for RawField {
    fn from(field: FieldSpec) -> Self {
        match field.alias {
            None => RawField::Column(field.column),
            Some(alias) => RawField::Renamed(BTreeMap::from([(field.column, alias)])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_db_unit_defaults() {
        let unit: UnitExtractSpec = serde_json::from_value(json!({
            "type": "db",
            "table": "nfc.datatypes",
            "pk": "id",
            "fields": ["id", {"caption": "title"}]
        }))
        .unwrap();
        let db = unit.as_db().expect("db unit");
        assert_eq!(db.output, OutputMode::Plain);
        assert!(db.details.is_empty());
        assert_eq!(db.fields[0], FieldSpec::column("id"));
        assert_eq!(db.fields[1].output_name(), "title");
        assert_eq!(db.fields[1].column, "caption");
    }

    #[test]
    fn test_field_with_two_entries_is_rejected() {
        let result: Result<FieldSpec, _> = serde_json::from_value(json!({"a": "b", "c": "d"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_document_unit_path_default() {
        let unit: UnitExtractSpec =
            serde_json::from_value(json!({"type": "json", "valueScoped": true})).unwrap();
        assert_eq!(unit.path_pattern("orders"), "!.*.orders");
        match unit {
            UnitExtractSpec::Json(doc) => assert!(doc.value_scoped),
            other => panic!("expected json unit, got {other:?}"),
        }
    }

    #[test]
    fn test_sort_spec_forms() {
        let one: SortSpec = serde_json::from_value(json!("code")).unwrap();
        let many: SortSpec = serde_json::from_value(json!(["code", "id desc"])).unwrap();
        assert_eq!(one.order_by(), "code");
        assert_eq!(many.order_by(), "code,id desc");
    }
}
