//! Date and timestamp coercion.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::TransformError;
use crate::types::Value;

use super::{text_input, unsupported};

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Coerce a loosely formatted date string to a calendar date.
///
/// Timestamps (ISO 8601 / RFC 3339) are truncated to their date part.
pub fn to_date(value: &Value) -> Result<Value, TransformError> {
    const NAME: &str = "date";
    match value {
        Value::Null => Ok(Value::Null),
        Value::Date(d) => Ok(Value::Date(*d)),
        Value::Timestamp(ts) => Ok(Value::Date(ts.date())),
        Value::Text(raw) => {
            let s = text_input(NAME, raw)?;
            parse_date(s)
                .map(Value::Date)
                .ok_or_else(|| TransformError::new(NAME, raw.as_str(), "unrecognized date format"))
        }
        other => Err(unsupported(NAME, other)),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Some(d) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
    {
        return Some(d);
    }
    // Compact `YYYYMMDD`; restricted to exactly eight digits so epoch seconds are not misread.
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
            return Some(d);
        }
    }
    if let Some(ts) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(ts.date());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.naive_utc().date())
}

/// Coerce seconds since the Unix epoch (integer or fractional) to a UTC timestamp.
pub fn to_epoch_timestamp(value: &Value) -> Result<Value, TransformError> {
    const NAME: &str = "epoch_timestamp";
    match value {
        Value::Null => Ok(Value::Null),
        Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
        Value::Int(secs) => from_secs(NAME, *secs, 0, &secs.to_string()),
        Value::Float(f) => from_float_secs(NAME, *f, &f.to_string()),
        Value::Text(raw) => {
            let s = text_input(NAME, raw)?;
            if let Ok(secs) = s.parse::<i64>() {
                return from_secs(NAME, secs, 0, raw);
            }
            let f = s
                .parse::<f64>()
                .map_err(|e| TransformError::new(NAME, raw.as_str(), e.to_string()))?;
            from_float_secs(NAME, f, raw)
        }
        other => Err(unsupported(NAME, other)),
    }
}

fn from_float_secs(name: &'static str, f: f64, raw: &str) -> Result<Value, TransformError> {
    if !f.is_finite() {
        return Err(TransformError::new(name, raw, "not a finite number"));
    }
    let secs = f.floor();
    if secs < i64::MIN as f64 || secs >= i64::MAX as f64 {
        return Err(TransformError::new(name, raw, "epoch seconds out of range"));
    }
    let nanos = ((f - secs) * 1e9).round().min(999_999_999.0) as u32;
    from_secs(name, secs as i64, nanos, raw)
}

fn from_secs(name: &'static str, secs: i64, nanos: u32, raw: &str) -> Result<Value, TransformError> {
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| Value::Timestamp(dt.naive_utc()))
        .ok_or_else(|| TransformError::new(name, raw, "epoch seconds out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn parses_common_date_layouts() {
        assert_eq!(to_date(&text("1995-10-30")).unwrap(), date(1995, 10, 30));
        assert_eq!(to_date(&text("1995/10/30")).unwrap(), date(1995, 10, 30));
        assert_eq!(to_date(&text("10/30/1995")).unwrap(), date(1995, 10, 30));
        assert_eq!(to_date(&text("19951030")).unwrap(), date(1995, 10, 30));
        assert_eq!(to_date(&text("1995-10-30T12:30:00")).unwrap(), date(1995, 10, 30));
        assert_eq!(to_date(&text("1995-10-30T23:00:00+00:00")).unwrap(), date(1995, 10, 30));
    }

    #[test]
    fn rejects_unparsable_dates() {
        assert!(to_date(&text("1")).is_err());
        assert!(to_date(&text("2012-13-45")).is_err());
        assert!(to_date(&text("yesterday")).is_err());
        assert!(to_date(&text("812764800")).is_err());
    }

    #[test]
    fn date_is_idempotent() {
        let once = to_date(&text("2001-01-02")).unwrap();
        assert_eq!(to_date(&once).unwrap(), once);
    }

    #[test]
    fn epoch_seconds_become_utc_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2009, 12, 14)
            .unwrap()
            .and_hms_opt(2, 52, 24)
            .unwrap();
        assert_eq!(
            to_epoch_timestamp(&text("1260759144")).unwrap(),
            Value::Timestamp(expected)
        );
        assert_eq!(
            to_epoch_timestamp(&Value::Int(1_260_759_144)).unwrap(),
            Value::Timestamp(expected)
        );

        let fractional = to_epoch_timestamp(&text("1260759144.5")).unwrap();
        assert_eq!(
            fractional,
            Value::Timestamp(expected + chrono::Duration::milliseconds(500))
        );
        assert_eq!(to_epoch_timestamp(&fractional).unwrap(), fractional);
    }

    #[test]
    fn epoch_rejects_garbage() {
        assert!(to_epoch_timestamp(&text("soon")).is_err());
        assert!(to_epoch_timestamp(&text("1e300")).is_err());
        assert!(to_epoch_timestamp(&Value::Bool(true)).is_err());
    }
}
