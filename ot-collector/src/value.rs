//! Driver value to JSON conversion.
//!
//! Both engines hand back loosely typed cells; everything is normalized to
//! JSON scalars here so payloads serialize uniformly: timestamps ISO-8601,
//! decimals as floats, unknown values as null.

use chrono::SecondsFormat;
use mysql_async::consts::{ColumnFlags, ColumnType};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Type};

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// MySQL
// ---------------------------------------------------------------------------

/// Decode a text-protocol byte cell using the column metadata. The text
/// protocol ships every non-null cell as bytes; the column type tells us
/// whether the payload is numeric.
pub fn decode_mysql_text_bytes(bytes: &[u8], column_type: ColumnType, unsigned: bool) -> Value {
    let text = String::from_utf8_lossy(bytes);
    match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            if unsigned {
                text.parse::<u64>()
                    .map(|v| Value::Number(v.into()))
                    .unwrap_or_else(|_| Value::String(text.into_owned()))
            } else {
                text.parse::<i64>()
                    .map(|v| Value::Number(v.into()))
                    .unwrap_or_else(|_| Value::String(text.into_owned()))
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT
        | ColumnType::MYSQL_TYPE_DOUBLE
        | ColumnType::MYSQL_TYPE_DECIMAL
        | ColumnType::MYSQL_TYPE_NEWDECIMAL => text
            .parse::<f64>()
            .map(float_value)
            .unwrap_or_else(|_| Value::String(text.into_owned())),
        _ => Value::String(text.into_owned()),
    }
}

/// Convert one MySQL cell to JSON using its column metadata.
pub fn mysql_cell_to_json(value: &mysql_async::Value, column: &mysql_async::Column) -> Value {
    use mysql_async::Value as V;
    match value {
        V::NULL => Value::Null,
        V::Bytes(bytes) => decode_mysql_text_bytes(
            bytes,
            column.column_type(),
            column.flags().contains(ColumnFlags::UNSIGNED_FLAG),
        ),
        V::Int(v) => Value::Number((*v).into()),
        V::UInt(v) => Value::Number((*v).into()),
        V::Float(v) => float_value(*v as f64),
        V::Double(v) => float_value(*v),
        V::Date(year, month, day, hour, minute, second, micro) => Value::String(format!(
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"
        )),
        V::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let total_hours = u32::from(*hours) + days * 24;
            Value::String(format!(
                "{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}

/// All cells of a MySQL row in column order.
pub fn mysql_row_values(row: &mysql_async::Row) -> Vec<Value> {
    let columns = row.columns_ref();
    (0..row.len())
        .map(|idx| {
            row.as_ref(idx)
                .map(|value| mysql_cell_to_json(value, &columns[idx]))
                .unwrap_or(Value::Null)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

fn pg_typed_cell<'a, T, F>(row: &'a Row, idx: usize, convert: F) -> Value
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    match row.try_get::<usize, Option<T>>(idx) {
        Ok(Some(v)) => convert(v),
        Ok(None) => Value::Null,
        Err(err) => {
            tracing::debug!(column = idx, %err, "failed to decode postgres cell");
            Value::Null
        }
    }
}

/// Convert one PostgreSQL cell to JSON using the column's declared type.
pub fn pg_cell_to_json(row: &Row, idx: usize) -> Value {
    let ty = row.columns()[idx].type_().clone();
    if ty == Type::BOOL {
        pg_typed_cell::<bool, _>(row, idx, Value::Bool)
    } else if ty == Type::CHAR {
        // "char" system type, e.g. attalign / relkind
        pg_typed_cell::<i8, _>(row, idx, |v| Value::String((v as u8 as char).to_string()))
    } else if ty == Type::INT2 {
        pg_typed_cell::<i16, _>(row, idx, |v| Value::Number(i64::from(v).into()))
    } else if ty == Type::INT4 {
        pg_typed_cell::<i32, _>(row, idx, |v| Value::Number(i64::from(v).into()))
    } else if ty == Type::INT8 {
        pg_typed_cell::<i64, _>(row, idx, |v| Value::Number(v.into()))
    } else if ty == Type::OID {
        pg_typed_cell::<u32, _>(row, idx, |v| Value::Number(u64::from(v).into()))
    } else if ty == Type::FLOAT4 {
        pg_typed_cell::<f32, _>(row, idx, |v| float_value(f64::from(v)))
    } else if ty == Type::FLOAT8 {
        pg_typed_cell::<f64, _>(row, idx, float_value)
    } else if ty == Type::NUMERIC {
        pg_typed_cell::<rust_decimal::Decimal, _>(row, idx, |v| {
            v.to_f64().map(float_value).unwrap_or(Value::Null)
        })
    } else if ty == Type::TIMESTAMPTZ {
        pg_typed_cell::<chrono::DateTime<chrono::Utc>, _>(row, idx, |v| {
            Value::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        })
    } else if ty == Type::TIMESTAMP {
        pg_typed_cell::<chrono::NaiveDateTime, _>(row, idx, |v| {
            Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        })
    } else if ty == Type::DATE {
        pg_typed_cell::<chrono::NaiveDate, _>(row, idx, |v| Value::String(v.to_string()))
    } else if ty == Type::JSON || ty == Type::JSONB {
        pg_typed_cell::<Value, _>(row, idx, |v| v)
    } else {
        // text, varchar, name, bpchar and anything else with a text form
        pg_typed_cell::<String, _>(row, idx, Value::String)
    }
}

/// All cells of a PostgreSQL row in column order.
pub fn pg_row_values(row: &Row) -> Vec<Value> {
    (0..row.columns().len())
        .map(|idx| pg_cell_to_json(row, idx))
        .collect()
}

/// A PostgreSQL row as a `column -> value` map. Null cells are omitted when
/// `skip_nulls` is set, matching the aggregated-metric row shape.
pub fn pg_row_map(row: &Row, skip_nulls: bool) -> Map<String, Value> {
    let mut map = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = pg_cell_to_json(row, idx);
        if skip_nulls && value.is_null() {
            continue;
        }
        map.insert(column.name().to_string(), value);
    }
    map
}
