//! JSON parameter values bound by the type the server inferred.

use anyhow::{anyhow, Context, Result};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::error::Error;
use std::str::FromStr;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type};

pub type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// SQL NULL of whatever type the parameter has.
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(&self, _: &Type, _: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Bind `params` in position order for a prepared statement.
///
/// Names missing from `params` are bound as NULL.
pub fn bind_params(
    names: &[String],
    types: &[Type],
    params: &Map<String, Value>,
) -> Result<Vec<BoxedParam>> {
    names
        .iter()
        .zip(types)
        .map(|(name, ty)| {
            let value = params.get(name).unwrap_or(&Value::Null);
            to_sql_param(value, ty).with_context(|| format!("Cannot bind :{name} as {ty}"))
        })
        .collect()
}

/// Convert one JSON value into a parameter of type `ty`.
pub fn to_sql_param(value: &Value, ty: &Type) -> Result<BoxedParam> {
    if value.is_null() {
        return Ok(Box::new(SqlNull));
    }
    if let Kind::Array(member) = ty.kind() {
        return array_param(value, member);
    }

    match *ty {
        Type::BOOL => Ok(Box::new(as_bool(value)?)),
        Type::INT2 => Ok(Box::new(i16::try_from(as_i64(value)?)?)),
        Type::INT4 => Ok(Box::new(i32::try_from(as_i64(value)?)?)),
        Type::INT8 => Ok(Box::new(as_i64(value)?)),
        Type::FLOAT4 => Ok(Box::new(as_f64(value)? as f32)),
        Type::FLOAT8 => Ok(Box::new(as_f64(value)?)),
        Type::NUMERIC => Ok(Box::new(as_decimal(value)?)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Ok(Box::new(as_text(value)))
        }
        Type::JSON | Type::JSONB => Ok(Box::new(value.clone())),
        Type::UUID => Ok(Box::new(uuid::Uuid::parse_str(as_str(value)?)?)),
        Type::TIMESTAMPTZ => Ok(Box::new(as_timestamptz(as_str(value)?)?)),
        Type::TIMESTAMP => Ok(Box::new(as_timestamp(as_str(value)?)?)),
        Type::DATE => Ok(Box::new(as_date(as_str(value)?)?)),
        _ => Err(anyhow!("Unsupported PostgreSQL parameter type: {ty}")),
    }
}

/// Array parameters; a scalar is bound as a one-element array.
fn array_param(value: &Value, member: &Type) -> Result<BoxedParam> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    fn collect<T>(items: &[&Value], f: impl Fn(&Value) -> Result<T>) -> Result<Vec<Option<T>>> {
        items
            .iter()
            .map(|item| match item {
                Value::Null => Ok(None),
                item => f(item).map(Some),
            })
            .collect()
    }

    match *member {
        Type::BOOL => Ok(Box::new(collect(&items, as_bool)?)),
        Type::INT2 => Ok(Box::new(collect(&items, |v| {
            Ok(i16::try_from(as_i64(v)?)?)
        })?)),
        Type::INT4 => Ok(Box::new(collect(&items, |v| {
            Ok(i32::try_from(as_i64(v)?)?)
        })?)),
        Type::INT8 => Ok(Box::new(collect(&items, as_i64)?)),
        Type::FLOAT8 => Ok(Box::new(collect(&items, as_f64)?)),
        Type::NUMERIC => Ok(Box::new(collect(&items, as_decimal)?)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            Ok(Box::new(collect(&items, |v| Ok(as_text(v)))?))
        }
        Type::UUID => Ok(Box::new(collect(&items, |v| {
            Ok(uuid::Uuid::parse_str(as_str(v)?)?)
        })?)),
        _ => Err(anyhow!("Unsupported PostgreSQL array member type: {member}")),
    }
}

fn as_str(value: &Value) -> Result<&str> {
    value
        .as_str()
        .ok_or_else(|| anyhow!("expected a string, got {value}"))
}

fn as_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => s
            .parse::<bool>()
            .map_err(|_| anyhow!("'{s}' is not a boolean")),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        other => Err(anyhow!("expected a boolean, got {other}")),
    }
}

fn as_i64(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| anyhow!("{n} is not an integer")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| anyhow!("'{s}' is not an integer")),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(anyhow!("expected an integer, got {other}")),
    }
}

fn as_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("{n} is not a float")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("'{s}' is not a number")),
        other => Err(anyhow!("expected a number, got {other}")),
    }
}

fn as_decimal(value: &Value) -> Result<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => return Err(anyhow!("expected a decimal, got {other}")),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| anyhow!("'{text}' is not a decimal: {e}"))
}

/// Text form of any value; containers are written as JSON.
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_timestamptz(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Offset-less values are taken as UTC
    Ok(as_timestamp(s)?.and_utc())
}

fn as_timestamp(s: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    as_date(s)?
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("Invalid timestamp: {s}"))
}

fn as_date(s: &str) -> Result<NaiveDate> {
    // Accept a timestamp and keep its date part
    let date_part = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|e| anyhow!("Invalid date '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encodes(value: Value, ty: Type) -> bool {
        let param = to_sql_param(&value, &ty).unwrap();
        let mut buf = BytesMut::new();
        matches!(param.to_sql_checked(&ty, &mut buf), Ok(IsNull::No))
    }

    #[test]
    fn test_null_binds_to_any_type() {
        for ty in [Type::INT4, Type::TEXT, Type::JSONB, Type::INT4_ARRAY] {
            let param = to_sql_param(&Value::Null, &ty).unwrap();
            let mut buf = BytesMut::new();
            assert!(matches!(param.to_sql_checked(&ty, &mut buf), Ok(IsNull::Yes)));
        }
    }

    #[test]
    fn test_numeric_strings_bind_to_integers() {
        assert!(encodes(json!("42"), Type::INT4));
        assert!(encodes(json!(42), Type::INT8));
        assert!(to_sql_param(&json!("x"), &Type::INT4).is_err());
        assert!(to_sql_param(&json!(70000), &Type::INT2).is_err());
    }

    #[test]
    fn test_decimal_and_float() {
        assert!(encodes(json!(12.5), Type::NUMERIC));
        assert!(encodes(json!("1e3"), Type::NUMERIC));
        assert!(encodes(json!(1), Type::FLOAT8));
    }

    #[test]
    fn test_scalar_promoted_to_array() {
        assert!(encodes(json!(3), Type::INT4_ARRAY));
        assert!(encodes(json!([1, null, "2"]), Type::INT8_ARRAY));
        assert!(encodes(json!(["a", "b"]), Type::TEXT_ARRAY));
    }

    #[test]
    fn test_text_accepts_any_scalar() {
        assert!(encodes(json!(7), Type::TEXT));
        assert!(encodes(json!({"a": 1}), Type::VARCHAR));
        assert!(encodes(json!({"a": 1}), Type::JSONB));
    }

    #[test]
    fn test_dates_and_times() {
        assert!(encodes(json!("2024-01-15"), Type::DATE));
        assert!(encodes(json!("2024-01-15T10:30:00Z"), Type::TIMESTAMPTZ));
        assert!(encodes(json!("2024-01-15 10:30:00"), Type::TIMESTAMPTZ));
        assert!(encodes(json!("2024-01-15T10:30:00.25"), Type::TIMESTAMP));
        assert!(encodes(
            json!("67e55044-10b1-426f-9247-bb680e5fe0c8"),
            Type::UUID
        ));
        assert!(to_sql_param(&json!("yesterday"), &Type::DATE).is_err());
    }

    #[test]
    fn test_bind_params_in_position_order() {
        let params = json!({"name": "x", "id": "5"});
        let bound = bind_params(
            &["id".to_string(), "name".to_string(), "absent".to_string()],
            &[Type::INT4, Type::TEXT, Type::INT8],
            params.as_object().unwrap(),
        )
        .unwrap();
        assert_eq!(bound.len(), 3);
        let mut buf = BytesMut::new();
        assert!(matches!(
            bound[2].to_sql_checked(&Type::INT8, &mut buf),
            Ok(IsNull::Yes)
        ));
    }
}
