//! Row decoding into JSON.
//!
//! Column values are decoded by trying the common Rust types in a fixed order chosen
//! from the column's declared type name. Anything that cannot be decoded becomes null.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Binary,
    Json,
    DateTime,
    Text,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower.contains("float")
        || lower.contains("double")
        || lower.contains("real")
        || lower == "numeric"
    {
        return TypeCategory::Float;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    if lower.contains("json") {
        return TypeCategory::Json;
    }
    if lower.contains("time") || lower == "date" {
        return TypeCategory::DateTime;
    }
    TypeCategory::Text
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
}

macro_rules! impl_row_to_json {
    ($row:ty) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name());
                        (col.name().to_string(), decode_column(self, idx, category))
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow);
impl_row_to_json!(PgRow);
impl_row_to_json!(SqliteRow);

fn decode_column<R>(row: &R, idx: usize, category: TypeCategory) -> JsonValue
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    for<'r> Option<i64>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<i32>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<f64>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<bool>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<String>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<Vec<u8>>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<NaiveDateTime>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<DateTime<Utc>>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<NaiveDate>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<NaiveTime>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    match category {
        TypeCategory::Integer => {
            if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
                return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
            }
            row.try_get::<Option<i32>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::from)
                .unwrap_or(JsonValue::Null)
        }
        TypeCategory::Float => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(|v| {
                serde_json::Number::from_f64(v)
                    .map(JsonValue::Number)
                    .unwrap_or_else(|| JsonValue::String(v.to_string()))
            })
            .unwrap_or(JsonValue::Null),
        TypeCategory::Boolean => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null),
        TypeCategory::Binary => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::String(STANDARD.encode(v)))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Json => match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(s)) => serde_json::from_str(&s).unwrap_or(JsonValue::String(s)),
            _ => JsonValue::Null,
        },
        TypeCategory::DateTime => {
            if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
                return v.map(|t| JsonValue::String(t.to_string())).unwrap_or(JsonValue::Null);
            }
            if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
                return v.map(|t| JsonValue::String(t.to_rfc3339())).unwrap_or(JsonValue::Null);
            }
            if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
                return v.map(|d| JsonValue::String(d.to_string())).unwrap_or(JsonValue::Null);
            }
            if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
                return v.map(|t| JsonValue::String(t.to_string())).unwrap_or(JsonValue::Null);
            }
            row.try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null)
        }
        TypeCategory::Text => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
    }
}
