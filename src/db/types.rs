//! Native row decoding.
//!
//! This module converts sqlx rows into backend-neutral [`Row`]s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! SQLite is classified by the storage class of each value (its columns are
//! dynamically typed); MySQL by the declared column type.

use crate::error::DbResult;
use crate::models::{Row, SqlValue};
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Timestamp,
    Date,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Integer types
    if lower.contains("int") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "timestamp" || lower == "datetime" {
        return TypeCategory::Timestamp;
    }

    if lower == "date" {
        return TypeCategory::Date;
    }

    if lower.contains("blob") || lower.contains("binary") {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "enum" || lower == "json" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

/// Decode a SQLite row.
pub fn sqlite_row(row: &SqliteRow) -> DbResult<Row> {
    let mut names = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (idx, col) in row.columns().iter().enumerate() {
        names.push(col.name().to_string());
        values.push(sqlite::decode_column(row, idx)?);
    }
    Ok(Row::new(names, values))
}

/// Decode a MySQL row.
pub fn mysql_row(row: &MySqlRow) -> DbResult<Row> {
    let mut names = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (idx, col) in row.columns().iter().enumerate() {
        names.push(col.name().to_string());
        let category = categorize_type(col.type_info().name());
        values.push(mysql::decode_column(row, idx, category)?);
    }
    Ok(Row::new(names, values))
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize) -> DbResult<SqlValue> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(SqlValue::Null);
        }
        // Storage class of this value, not the declared column type.
        let category = categorize_type(raw.type_info().name());
        let value = match category {
            TypeCategory::Integer => SqlValue::Int(row.try_get_unchecked::<i64, _>(idx)?),
            TypeCategory::Boolean => SqlValue::Bool(row.try_get_unchecked::<bool, _>(idx)?),
            TypeCategory::Float => SqlValue::Float(row.try_get_unchecked::<f64, _>(idx)?),
            TypeCategory::Binary => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
            _ => SqlValue::Text(row.try_get_unchecked::<String, _>(idx)?),
        };
        Ok(value)
    }
}

mod mysql {
    use super::*;
    use crate::error::DbError;
    use chrono::{NaiveDate, NaiveDateTime};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> DbResult<SqlValue> {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(SqlValue::Null);
        }
        let value = match category {
            TypeCategory::Boolean => SqlValue::Bool(row.try_get::<bool, _>(idx)?),
            TypeCategory::Integer => decode_integer(row, idx)?,
            TypeCategory::Float => match row.try_get::<f64, _>(idx) {
                Ok(v) => SqlValue::Float(v),
                Err(_) => SqlValue::Float(row.try_get::<f32, _>(idx)?.into()),
            },
            TypeCategory::Timestamp => {
                SqlValue::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?)
            }
            TypeCategory::Date => SqlValue::Text(
                row.try_get::<NaiveDate, _>(idx)?
                    .format("%Y-%m-%d")
                    .to_string(),
            ),
            TypeCategory::Binary => SqlValue::Blob(row.try_get::<Vec<u8>, _>(idx)?),
            TypeCategory::Decimal | TypeCategory::Text | TypeCategory::Unknown => {
                match row.try_get_unchecked::<String, _>(idx) {
                    Ok(v) => SqlValue::Text(v),
                    Err(_) => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
                }
            }
        };
        Ok(value)
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> DbResult<SqlValue> {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Ok(SqlValue::Int(v));
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        let unsigned = row.try_get::<u64, _>(idx)?;
        i64::try_from(unsigned).map(SqlValue::Int).map_err(|_| {
            DbError::decode(
                row.columns()[idx].name(),
                format!("unsigned value {unsigned} exceeds i64"),
            )
        })
    }
}
