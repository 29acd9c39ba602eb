//! Row decoding into JSON objects.

use anyhow::{anyhow, Result};
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use tokio_postgres::types::Type;
use tokio_postgres::Row;
use tracing::warn;

/// Decode every column of `row`, keyed by column name.
pub fn row_to_json(row: &Row) -> Result<Map<String, Value>> {
    let mut record = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        record.insert(column.name().to_string(), convert_postgres_value(row, index)?);
    }
    Ok(record)
}

fn array_value<T>(items: Option<Vec<Option<T>>>, f: impl Fn(T) -> Value) -> Value {
    match items {
        Some(items) => Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, &f))
                .collect(),
        ),
        None => Value::Null,
    }
}

fn decimal_value(decimal: Decimal) -> Value {
    let text = decimal.normalize().to_string();
    match serde_json::from_str::<Number>(&text) {
        Ok(number) => Value::Number(number),
        Err(e) => {
            warn!("NUMERIC value '{text}' kept as text: {e}");
            Value::String(text)
        }
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Convert one PostgreSQL column value to JSON
fn convert_postgres_value(row: &Row, index: usize) -> Result<Value> {
    let column = &row.columns()[index];
    let pg_type = column.type_();

    let value = match *pg_type {
        Type::BOOL => row.try_get::<_, Option<bool>>(index)?.map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)?
            .map(|i| Value::from(i64::from(i))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)?
            .map(|i| Value::from(i64::from(i))),
        Type::INT8 => row.try_get::<_, Option<i64>>(index)?.map(Value::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)?
            .map(|f| float_value(f64::from(f))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(index)?.map(float_value),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(index)?
            .map(decimal_value),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(index)?.map(Value::String)
        }
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)?
            .map(|ts| Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)?
            .map(|dt| Value::String(dt.to_rfc3339())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(index)?
            .map(|date| Value::String(date.format("%Y-%m-%d").to_string())),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(index)?
            .map(|time| Value::String(time.to_string())),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(index)?,
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(index)?
            .map(|uuid| Value::String(uuid.to_string())),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(index)?.map(|bytes| {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }),
        Type::BOOL_ARRAY => Some(array_value(
            row.try_get::<_, Option<Vec<Option<bool>>>>(index)?,
            Value::Bool,
        )),
        Type::INT2_ARRAY => Some(array_value(
            row.try_get::<_, Option<Vec<Option<i16>>>>(index)?,
            |i| Value::from(i64::from(i)),
        )),
        Type::INT4_ARRAY => Some(array_value(
            row.try_get::<_, Option<Vec<Option<i32>>>>(index)?,
            |i| Value::from(i64::from(i)),
        )),
        Type::INT8_ARRAY => Some(array_value(
            row.try_get::<_, Option<Vec<Option<i64>>>>(index)?,
            Value::from,
        )),
        Type::FLOAT8_ARRAY => Some(array_value(
            row.try_get::<_, Option<Vec<Option<f64>>>>(index)?,
            float_value,
        )),
        Type::NUMERIC_ARRAY => Some(array_value(
            row.try_get::<_, Option<Vec<Option<Decimal>>>>(index)?,
            decimal_value,
        )),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => Some(array_value(
            row.try_get::<_, Option<Vec<Option<String>>>>(index)?,
            Value::String,
        )),
        Type::VOID => None,
        _ => {
            // Unknown types come through as text when the driver allows it
            match row.try_get::<_, Option<String>>(index) {
                Ok(text) => text.map(Value::String),
                Err(_) => {
                    return Err(anyhow!(
                        "Unsupported PostgreSQL type {pg_type} in column '{}'",
                        column.name()
                    ))
                }
            }
        }
    };
    Ok(value.unwrap_or(Value::Null))
}
