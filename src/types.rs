//! Core data model types.
//!
//! A table is declared as an ordered list of columns, each with a [`StorageType`]. Source files are
//! read into [`RowBatch`]es of [`Value`]s aligned to that column order.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::EtlError;

/// Target column type in the relational store.
///
/// Only used to render DDL and to validate values in the in-memory store; the ingestion engine
/// itself treats it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StorageType {
    /// Unbounded text.
    Text,
    /// Binary JSON document.
    Json,
    /// 16-bit integer.
    SmallInt,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Fixed-point decimal.
    Decimal { precision: u8, scale: u8 },
    /// Timestamp without time zone (values are UTC).
    Timestamp,
    /// Calendar date.
    Date,
    /// Boolean.
    Boolean,
}

impl StorageType {
    /// SQL type name used in `CREATE TABLE`.
    pub fn sql_name(&self) -> String {
        match self {
            StorageType::Text => "TEXT".to_string(),
            StorageType::Json => "JSONB".to_string(),
            StorageType::SmallInt => "SMALLINT".to_string(),
            StorageType::Integer => "INTEGER".to_string(),
            StorageType::BigInt => "BIGINT".to_string(),
            StorageType::Decimal { precision, scale } => format!("DECIMAL({precision}, {scale})"),
            StorageType::Timestamp => "TIMESTAMP".to_string(),
            StorageType::Date => "DATE".to_string(),
            StorageType::Boolean => "BOOLEAN".to_string(),
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_name())
    }
}

impl FromStr for StorageType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();

        if let Some(args) = normalized
            .strip_prefix("decimal(")
            .or_else(|| normalized.strip_prefix("numeric("))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let (p, sc) = args
                .split_once(',')
                .ok_or_else(|| EtlError::config(format!("invalid decimal type '{s}'")))?;
            let precision = p
                .parse::<u8>()
                .map_err(|e| EtlError::config(format!("invalid decimal precision in '{s}': {e}")))?;
            let scale = sc
                .parse::<u8>()
                .map_err(|e| EtlError::config(format!("invalid decimal scale in '{s}': {e}")))?;
            if precision == 0 || scale > precision {
                return Err(EtlError::config(format!(
                    "decimal scale must be <= precision and precision > 0, got ({precision}, {scale})"
                )));
            }
            return Ok(StorageType::Decimal { precision, scale });
        }

        match normalized.as_str() {
            "text" | "varchar" => Ok(StorageType::Text),
            "json" | "jsonb" => Ok(StorageType::Json),
            "smallint" | "int2" => Ok(StorageType::SmallInt),
            "integer" | "int" | "int4" => Ok(StorageType::Integer),
            "bigint" | "int8" => Ok(StorageType::BigInt),
            "decimal" | "numeric" => Ok(StorageType::Decimal {
                precision: 10,
                scale: 2,
            }),
            "timestamp" => Ok(StorageType::Timestamp),
            "date" => Ok(StorageType::Date),
            "boolean" | "bool" => Ok(StorageType::Boolean),
            _ => Err(EtlError::config(format!("unknown storage type '{s}'"))),
        }
    }
}

impl TryFrom<String> for StorageType {
    type Error = EtlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StorageType> for String {
    fn from(value: StorageType) -> Self {
        value.sql_name()
    }
}

/// A single value in a [`RowBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing, empty or sentinel-marked value.
    Null,
    /// Raw or pass-through text.
    Text(String),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Structured JSON document.
    Json(serde_json::Value),
    /// Calendar date.
    Date(NaiveDate),
    /// UTC timestamp.
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the text of a [`Value::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A bounded group of rows read from one source file.
///
/// Rows are stored row-major, each aligned to [`RowBatch::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    /// Column names, shared between all batches of one read.
    pub columns: Arc<[String]>,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
    /// 0-based index of the first row of this batch among the file's data rows.
    pub offset: u64,
}

impl RowBatch {
    pub fn new(columns: Arc<[String]>, rows: Vec<Vec<Value>>, offset: u64) -> Self {
        Self {
            columns,
            rows,
            offset,
        }
    }

    /// Number of rows in the batch.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Clone out one column's values, in row order.
    pub fn column_values(&self, name: &str) -> Option<Vec<Value>> {
        let idx = self.index_of(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}
