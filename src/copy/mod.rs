//! Bulk-load serialization.
//!
//! Renders a transformed [`RowBatch`] into PostgreSQL's `COPY ... FROM STDIN` text format in an
//! in-memory buffer. This module never touches a connection: the resulting [`CopyPayload`] carries
//! the buffer together with the column list and the statement that loads it.
//!
//! Wire contract:
//!
//! - one record per row, newline-terminated, no header;
//! - fields joined by a single-byte delimiter; occurrences of the delimiter, backslash, newline,
//!   carriage return and tab inside a value are backslash-escaped, so the delimiter never appears
//!   unescaped in field content;
//! - `null` is written as a multi-character sentinel (`\N` by default);
//! - the column list is the table's declared column order.

mod text;

use std::sync::Arc;

use crate::error::{EtlError, EtlResult};
use crate::lifecycle::ddl::{quote_ident, quote_literal};
use crate::schema::TableSchema;
use crate::types::RowBatch;

pub use text::decode_records;
pub(crate) use text::{DATE_FORMAT, TIMESTAMP_FORMAT};

/// Delimiter and null sentinel of the COPY text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFormat {
    pub delimiter: u8,
    pub null: String,
}

impl Default for CopyFormat {
    fn default() -> Self {
        Self {
            delimiter: b'|',
            null: "\\N".to_string(),
        }
    }
}

impl CopyFormat {
    /// Check the format against what the server accepts for text COPY.
    pub fn validate(&self) -> EtlResult<()> {
        let d = self.delimiter;
        if !d.is_ascii() || d.is_ascii_alphanumeric() || matches!(d, b'\\' | b'.' | b'\n' | b'\r') {
            return Err(EtlError::config(format!(
                "invalid COPY delimiter {:?}: must be a single ASCII byte other than a letter, digit, '.', '\\\\' or newline",
                d as char
            )));
        }

        let null = &self.null;
        if null.chars().count() < 2 {
            return Err(EtlError::config(format!(
                "COPY null sentinel {null:?} must be at least 2 characters"
            )));
        }
        if null.contains(['\n', '\r']) || null.as_bytes().contains(&d) {
            return Err(EtlError::config(format!(
                "COPY null sentinel {null:?} must not contain newlines or the delimiter"
            )));
        }
        if null.contains('\\') && null != "\\N" {
            return Err(EtlError::config(format!(
                "COPY null sentinel {null:?} may only contain a backslash as \\N"
            )));
        }
        if !text::has_plain_char(null) {
            return Err(EtlError::config(format!(
                "COPY null sentinel {null:?} needs at least one character that is not an escape letter or digit"
            )));
        }
        Ok(())
    }
}

/// A serialized batch ready for `COPY ... FROM STDIN`.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyPayload {
    pub table: String,
    pub columns: Arc<[String]>,
    pub format: CopyFormat,
    pub data: Vec<u8>,
    pub rows: usize,
}

impl CopyPayload {
    /// The `COPY` statement that loads this payload.
    pub fn statement(&self) -> String {
        copy_statement(&self.table, &self.columns, &self.format, "FROM STDIN")
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// `COPY "t" ("a", "b") <direction> WITH (FORMAT text, DELIMITER '|', NULL '\N')`.
pub(crate) fn copy_statement(table: &str, columns: &[String], format: &CopyFormat, direction: &str) -> String {
    let columns = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    format!(
        "COPY {} ({columns}) {direction} WITH (FORMAT text, DELIMITER {}, NULL {})",
        quote_ident(table),
        quote_literal(&(format.delimiter as char).to_string()),
        quote_literal(&format.null),
    )
}

/// Serialize a transformed batch.
///
/// The batch's columns must be exactly the table's declared columns, in declaration order, and
/// every row must have one value per column. `format` is assumed valid (see
/// [`CopyFormat::validate`]).
pub fn serialize_batch(schema: &TableSchema, batch: &RowBatch, format: &CopyFormat) -> EtlResult<CopyPayload> {
    let declared = schema.column_names();
    if *batch.columns != *declared {
        return Err(EtlError::schema_mismatch(format!(
            "cannot serialize batch with columns {:?} into table '{}' declared as {:?}",
            batch.columns, schema.name, declared
        )));
    }

    let mut data = Vec::with_capacity(batch.row_count() * declared.len() * 8);
    for (i, row) in batch.rows.iter().enumerate() {
        if row.len() != declared.len() {
            return Err(EtlError::schema_mismatch(format!(
                "row {} has {} values, expected {}",
                batch.offset + i as u64,
                row.len(),
                declared.len()
            )));
        }
        for (idx, value) in row.iter().enumerate() {
            if idx > 0 {
                data.push(format.delimiter);
            }
            text::render_value(value, format, &mut data);
        }
        data.push(b'\n');
    }

    Ok(CopyPayload {
        table: schema.name.clone(),
        columns: Arc::clone(&batch.columns),
        format: format.clone(),
        data,
        rows: batch.row_count(),
    })
}
