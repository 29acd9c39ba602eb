//! Surrogate-key remapping for self-referencing units.

use serde_json::Value;
use std::collections::HashMap;

/// Per-unit map from a record's pre-load primary key to the key the store
/// returned for it.
///
/// Keys are compared as text, so `3` and `"3"` name the same row.
#[derive(Debug, Default)]
pub struct HierarchyMap {
    units: HashMap<String, HashMap<String, Value>>,
}

fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl HierarchyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `old` was stored as `new`. Null keys are ignored.
    pub fn record(&mut self, unit: &str, old: &Value, new: Value) {
        if let Some(key) = key_text(old) {
            self.units
                .entry(unit.to_string())
                .or_default()
                .insert(key, new);
        }
    }

    /// The stored key for a pre-load key, if it was remapped.
    pub fn lookup(&self, unit: &str, old: &Value) -> Option<&Value> {
        let key = key_text(old)?;
        self.units.get(unit)?.get(&key)
    }

    /// Number of remapped keys across all units.
    pub fn len(&self) -> usize {
        self.units.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether two key values name the same row.
pub(crate) fn same_key(a: &Value, b: &Value) -> bool {
    key_text(a) == key_text(b)
}
