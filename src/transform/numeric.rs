//! Numeric and boolean coercion.

use crate::error::TransformError;
use crate::types::Value;

use super::{text_input, unsupported};

// Bounds of the f64 values that convert to i64 without saturating.
const I64_MIN_F: f64 = -9_223_372_036_854_775_808.0;
const I64_MAX_F: f64 = 9_223_372_036_854_775_808.0;

/// Coerce to a 64-bit integer.
///
/// Accepts integer text and float text with a zero fraction (`"373554033.0"`), which is how
/// exported spreadsheets and dataframes often write integral columns.
pub fn to_int(value: &Value) -> Result<Value, TransformError> {
    const NAME: &str = "int";
    match value {
        Value::Null => Ok(Value::Null),
        Value::Int(v) => Ok(Value::Int(*v)),
        Value::Float(f) => float_to_int(NAME, *f, &f.to_string()),
        Value::Text(raw) => {
            let s = text_input(NAME, raw)?;
            match s.parse::<i64>() {
                Ok(v) => Ok(Value::Int(v)),
                Err(int_err) => match s.parse::<f64>() {
                    Ok(f) => float_to_int(NAME, f, raw),
                    Err(_) => Err(TransformError::new(NAME, raw.as_str(), int_err.to_string())),
                },
            }
        }
        other => Err(unsupported(NAME, other)),
    }
}

fn float_to_int(name: &'static str, f: f64, raw: &str) -> Result<Value, TransformError> {
    if !f.is_finite() {
        return Err(TransformError::new(name, raw, "not a finite number"));
    }
    if f.fract() != 0.0 {
        return Err(TransformError::new(name, raw, "value has a fractional part"));
    }
    if !(I64_MIN_F..I64_MAX_F).contains(&f) {
        return Err(TransformError::new(name, raw, "value out of range for a 64-bit integer"));
    }
    Ok(Value::Int(f as i64))
}

/// Coerce to a 64-bit float. Non-finite values are rejected.
pub fn to_float(value: &Value) -> Result<Value, TransformError> {
    const NAME: &str = "float";
    match value {
        Value::Null => Ok(Value::Null),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Int(v) => Ok(Value::Float(*v as f64)),
        Value::Text(raw) => {
            let s = text_input(NAME, raw)?;
            let f = s
                .parse::<f64>()
                .map_err(|e| TransformError::new(NAME, raw.as_str(), e.to_string()))?;
            if !f.is_finite() {
                return Err(TransformError::new(NAME, raw.as_str(), "not a finite number"));
            }
            Ok(Value::Float(f))
        }
        other => Err(unsupported(NAME, other)),
    }
}

/// Coerce to a boolean.
pub fn to_bool(value: &Value) -> Result<Value, TransformError> {
    const NAME: &str = "bool";
    match value {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        Value::Text(raw) => {
            let s = text_input(NAME, raw)?;
            parse_bool(s)
                .map(Value::Bool)
                .map_err(|message| TransformError::new(NAME, raw.as_str(), message))
        }
        other => Err(unsupported(NAME, other)),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}
