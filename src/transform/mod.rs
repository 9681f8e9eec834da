//! Value transform library.
//!
//! A transform is a pure function from one raw field to its coerced form. Transforms are looked up
//! by id from a [`TransformRegistry`], so a schema can reference them as data and be validated
//! before any I/O starts.
//!
//! Built-in ids:
//!
//! | id                | input                                  | output              |
//! |-------------------|----------------------------------------|---------------------|
//! | `int`             | integer text, or float text with no fraction | [`Value::Int`] |
//! | `float`           | float text                             | [`Value::Float`]    |
//! | `bool`            | `true/false/t/f/1/0/yes/no/y/n`        | [`Value::Bool`]     |
//! | `json`            | JSON, or single-quoted pseudo-JSON     | [`Value::Json`]     |
//! | `date`            | loosely formatted date                 | [`Value::Date`]     |
//! | `epoch_timestamp` | seconds since the Unix epoch           | [`Value::Timestamp`]|
//!
//! Every transform maps [`Value::Null`] to [`Value::Null`] and returns its own output unchanged,
//! so applying it twice is harmless.

mod document;
mod numeric;
mod temporal;

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::error::TransformError;
use crate::types::Value;

pub use document::to_json;
pub use numeric::{to_bool, to_float, to_int};
pub use temporal::{to_date, to_epoch_timestamp};

/// Signature shared by all transforms.
pub type TransformFn = fn(&Value) -> Result<Value, TransformError>;

/// Lookup table from transform id to function.
#[derive(Clone)]
pub struct TransformRegistry {
    entries: BTreeMap<String, TransformFn>,
}

impl TransformRegistry {
    /// A registry with no transforms.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// A registry with all built-in transforms.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("int", to_int);
        registry.register("float", to_float);
        registry.register("bool", to_bool);
        registry.register("json", to_json);
        registry.register("date", to_date);
        registry.register("epoch_timestamp", to_epoch_timestamp);
        registry
    }

    /// Register a transform, returning the one it replaced (if any).
    pub fn register(&mut self, id: impl Into<String>, func: TransformFn) -> Option<TransformFn> {
        self.entries.insert(id.into(), func)
    }

    pub fn get(&self, id: &str) -> Option<TransformFn> {
        self.entries.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("ids", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Where a field came from, for warning context.
#[derive(Debug, Clone, Copy)]
pub struct FieldLocation<'a> {
    pub table: &'a str,
    pub column: &'a str,
    /// 0-based data row index within the source file.
    pub row: u64,
}

/// Apply `func` to `value`, isolating failures.
///
/// A failure becomes [`Value::Null`] plus a logged warning; the returned flag reports whether that
/// happened. Nothing is propagated, so one bad field never affects its neighbours.
pub fn apply_isolated(func: TransformFn, value: &Value, location: &FieldLocation<'_>) -> (Value, bool) {
    match func(value) {
        Ok(coerced) => (coerced, false),
        Err(err) => {
            warn!(
                table = location.table,
                column = location.column,
                row = location.row,
                transform = err.transform,
                raw = %err.raw,
                "{err}; storing null"
            );
            (Value::Null, true)
        }
    }
}

/// Text of a value that a transform should parse, or `None` for null.
///
/// Blank text is rejected: the reader already turns empty cells into nulls, so blank text reaching
/// a transform means the caller fed raw fields directly.
fn text_input<'a>(transform: &'static str, raw: &'a str) -> Result<&'a str, TransformError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TransformError::new(transform, raw, "empty value"));
    }
    Ok(trimmed)
}

fn unsupported(transform: &'static str, value: &Value) -> TransformError {
    TransformError::new(transform, format!("{value:?}"), "unsupported input type")
}
