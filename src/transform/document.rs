//! Structured-document coercion.
//!
//! Some source columns hold Python-repr style pseudo-JSON (`[{'id': 16, 'name': 'Animation'}]`).
//! The repair is deliberately naive: every single quote becomes a double quote. A legitimate
//! apostrophe inside a string value (`'name': "Schindler's List"`) therefore breaks the document,
//! which then fails to parse and is stored as null. Python literals such as `None` or `True` are
//! not rewritten either.

use crate::error::TransformError;
use crate::types::Value;

use super::{text_input, unsupported};

/// Coerce to a JSON document, repairing single-quoted pseudo-JSON.
///
/// Input that is already valid JSON is parsed as-is, so re-applying the transform to its own
/// output (or to a field that was never single-quoted) does not alter it.
pub fn to_json(value: &Value) -> Result<Value, TransformError> {
    const NAME: &str = "json";
    match value {
        Value::Null => Ok(Value::Null),
        Value::Json(doc) => Ok(Value::Json(doc.clone())),
        Value::Text(raw) => {
            let s = text_input(NAME, raw)?;
            if let Ok(doc) = serde_json::from_str::<serde_json::Value>(s) {
                return Ok(Value::Json(doc));
            }
            let repaired = s.replace('\'', "\"");
            serde_json::from_str::<serde_json::Value>(&repaired)
                .map(Value::Json)
                .map_err(|e| TransformError::new(NAME, raw.as_str(), e.to_string()))
        }
        other => Err(unsupported(NAME, other)),
    }
}
