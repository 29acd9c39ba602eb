//! Record addressing rules for load units.
//!
//! A load record names its unit and carries its payload either under a
//! fixed property or under the Nth key of the record. The textual rules from
//! the schema (`$0`, `:$0`, `unit`) are parsed once into [`AddressMode`].

use crate::SchemaError;
use serde_json::{Map, Value};

/// How a record property is located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressMode {
    /// A fixed property name.
    ByName(String),
    /// The Nth key of the record, in document order.
    ByPosition(usize),
}

impl AddressMode {
    /// Parse a `unitField` rule: `$N` addresses the Nth key, anything else is a name.
    pub fn parse_unit_field(rule: &str) -> Result<Self, SchemaError> {
        Self::parse_with_prefix(rule, "$")
    }

    /// Parse a `unitData` rule: `:$N` addresses the Nth key, anything else is a name.
    pub fn parse_unit_data(rule: &str) -> Result<Self, SchemaError> {
        Self::parse_with_prefix(rule, ":$")
    }

    fn parse_with_prefix(rule: &str, prefix: &str) -> Result<Self, SchemaError> {
        match rule.strip_prefix(prefix) {
            Some(index) => index
                .parse::<usize>()
                .map(AddressMode::ByPosition)
                .map_err(|e| SchemaError::InvalidAddress {
                    rule: rule.to_string(),
                    reason: e.to_string(),
                }),
            None if rule.is_empty() => Err(SchemaError::InvalidAddress {
                rule: rule.to_string(),
                reason: "empty property name".to_string(),
            }),
            None => Ok(AddressMode::ByName(rule.to_string())),
        }
    }

    /// The key of `record` this rule points at.
    ///
    /// By-name rules always yield their name, even when the record lacks it.
    pub fn key<'a>(&'a self, record: &'a Map<String, Value>) -> Option<&'a str> {
        match self {
            AddressMode::ByName(name) => Some(name.as_str()),
            AddressMode::ByPosition(index) => record.keys().nth(*index).map(String::as_str),
        }
    }

    pub(crate) fn to_rule(&self, prefix: &str) -> String {
        match self {
            AddressMode::ByName(name) => name.clone(),
            AddressMode::ByPosition(index) => format!("{prefix}{index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_positional_rules() {
        assert_eq!(
            AddressMode::parse_unit_field("$0").unwrap(),
            AddressMode::ByPosition(0)
        );
        assert_eq!(
            AddressMode::parse_unit_data(":$2").unwrap(),
            AddressMode::ByPosition(2)
        );
    }

    #[test]
    fn test_parse_named_rules() {
        assert_eq!(
            AddressMode::parse_unit_field("unit").unwrap(),
            AddressMode::ByName("unit".to_string())
        );
        // A data rule only switches to positional with the `:$` prefix
        assert_eq!(
            AddressMode::parse_unit_data("$1").unwrap(),
            AddressMode::ByName("$1".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_bad_index() {
        assert!(matches!(
            AddressMode::parse_unit_field("$x"),
            Err(SchemaError::InvalidAddress { .. })
        ));
        assert!(AddressMode::parse_unit_field("").is_err());
    }

    #[test]
    fn test_key_follows_document_order() {
        let record = json!({"zeta": 1, "alpha": 2});
        let record = record.as_object().unwrap();
        assert_eq!(AddressMode::ByPosition(0).key(record), Some("zeta"));
        assert_eq!(AddressMode::ByPosition(1).key(record), Some("alpha"));
        assert_eq!(AddressMode::ByPosition(2).key(record), None);
        assert_eq!(
            AddressMode::ByName("data".to_string()).key(record),
            Some("data")
        );
    }
}
