//! Run filters.
//!
//! A filter maps a column (or a schema-declared alias of one) to either a
//! single value or a set of accepted values. The variant is fixed by the
//! shape of the supplied JSON, never guessed from the value being tested.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Membership: the field must equal one of the values.
    Set(Vec<Value>),
    /// Equality with a single value.
    Scalar(Value),
}

impl FilterValue {
    /// Whether `value` satisfies this condition (strict JSON equality).
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FilterValue::Set(values) => values.iter().any(|v| v == value),
            FilterValue::Scalar(expected) => expected == value,
        }
    }
}

/// Column → condition map applied to the main unit of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, FilterValue>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter with a single equality condition.
    pub fn single(column: impl Into<String>, value: Value) -> Self {
        let mut filter = Self::new();
        filter.insert(column, FilterValue::Scalar(value));
        filter
    }

    /// Parse a filter from a JSON object string such as `{"id": [1, 2]}`.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: FilterValue) {
        self.0.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&FilterValue> {
        self.0.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.0.iter()
    }

    /// Rename filter keys through a unit's alias map.
    ///
    /// Keys without an alias pass through unchanged.
    pub fn translate(&self, aliases: &BTreeMap<String, String>) -> Filter {
        Filter(
            self.0
                .iter()
                .map(|(key, value)| {
                    let column = aliases.get(key).unwrap_or(key);
                    (column.clone(), value.clone())
                })
                .collect(),
        )
    }

    /// Whether a parsed document object passes the filter.
    ///
    /// A condition only applies when its field is present on the object.
    /// Absent fields never exclude a record; a present null must match.
    pub fn admits(&self, record: &Value) -> bool {
        let Some(object) = record.as_object() else {
            return true;
        };
        !self.0.iter().any(|(field, condition)| match object.get(field) {
            None => false,
            Some(value) => !condition.matches(value),
        })
    }
}
