//! PostgreSQL COPY text format: value rendering, escaping and decoding.

use crate::error::{EtlError, EtlResult};
use crate::types::Value;

use super::CopyFormat;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Characters that change meaning after a backslash (`\n`, `\x41`, `\101`, ...).
const SPECIAL_ESCAPES: &[u8] = b"bfnrtvx0123456789";

/// Render one value into `out`.
///
/// Scalars go through the same escaping as text, so a custom delimiter or null sentinel that
/// matches a rendered number or date cannot change the field's meaning.
pub(crate) fn render_value(value: &Value, format: &CopyFormat, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(format.null.as_bytes()),
        Value::Text(s) => render_text(s, format, out),
        Value::Int(v) => render_text(&v.to_string(), format, out),
        Value::Float(v) => render_text(&v.to_string(), format, out),
        Value::Bool(b) => render_text(if *b { "t" } else { "f" }, format, out),
        Value::Json(doc) => render_text(&doc.to_string(), format, out),
        Value::Date(d) => render_text(&d.format(DATE_FORMAT).to_string(), format, out),
        Value::Timestamp(ts) => render_text(&ts.format(TIMESTAMP_FORMAT).to_string(), format, out),
    }
}

/// Escape text so the delimiter, record separator and backslash never appear unescaped.
pub(crate) fn render_text(s: &str, format: &CopyFormat, out: &mut Vec<u8>) {
    if s == format.null {
        // A literal value spelled like the sentinel: escape one ordinary character so the raw
        // field no longer equals the sentinel but still decodes to the same text.
        if let Some(pos) = s.bytes().position(|b| b.is_ascii() && !SPECIAL_ESCAPES.contains(&b)) {
            out.extend_from_slice(&s.as_bytes()[..pos]);
            out.push(b'\\');
            out.extend_from_slice(&s.as_bytes()[pos..]);
            return;
        }
    }

    for &b in s.as_bytes() {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b if b == format.delimiter => {
                out.push(b'\\');
                out.push(b);
            }
            b => out.push(b),
        }
    }
}

/// Whether `null` can be escaped away when a text value collides with it.
pub(crate) fn has_plain_char(null: &str) -> bool {
    null.bytes().any(|b| b.is_ascii() && !SPECIAL_ESCAPES.contains(&b))
}

/// Decode a COPY text payload into records of optional field strings.
///
/// Every record must have exactly `width` fields. This mirrors how the server parses the payload:
/// the raw field is compared to the null sentinel before escapes are resolved.
pub fn decode_records(data: &[u8], format: &CopyFormat, width: usize) -> EtlResult<Vec<Vec<Option<String>>>> {
    let mut records = Vec::new();
    if data.is_empty() {
        return Ok(records);
    }
    let body = data.strip_suffix(b"\n").unwrap_or(data);
    for (idx, line) in body.split(|&b| b == b'\n').enumerate() {
        let line_no = idx + 1;
        if line == b"\\." {
            break;
        }
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let fields = split_fields(line, format.delimiter);
        if fields.len() != width {
            return Err(EtlError::store(format!(
                "COPY line {line_no}: expected {width} fields, found {}",
                fields.len()
            )));
        }
        let mut record = Vec::with_capacity(width);
        for raw in fields {
            if raw == format.null.as_bytes() {
                record.push(None);
                continue;
            }
            let bytes = unescape(raw);
            let text = String::from_utf8(bytes)
                .map_err(|_| EtlError::store(format!("COPY line {line_no}: invalid UTF-8 in field")))?;
            record.push(Some(text));
        }
        records.push(record);
    }
    Ok(records)
}

fn split_fields(line: &[u8], delimiter: u8) -> Vec<&[u8]> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < line.len() {
        match line[i] {
            b'\\' => i += 2,
            b if b == delimiter => {
                fields.push(&line[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    fields.push(&line[start.min(line.len())..]);
    fields
}

fn unescape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 == raw.len() {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        let c = raw[i + 1];
        i += 2;
        match c {
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(c - b'0');
                let mut digits = 1;
                while digits < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                    value = value * 8 + u32::from(raw[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                out.push((value & 0xff) as u8);
            }
            b'x' if i < raw.len() && raw[i].is_ascii_hexdigit() => {
                let mut value = hex(raw[i]);
                i += 1;
                if i < raw.len() && raw[i].is_ascii_hexdigit() {
                    value = value * 16 + hex(raw[i]);
                    i += 1;
                }
                out.push(value);
            }
            other => out.push(other),
        }
    }
    out
}

fn hex(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn render(value: &Value, format: &CopyFormat) -> String {
        let mut out = Vec::new();
        render_value(value, format, &mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn escapes_structural_characters() {
        let format = CopyFormat::default();
        assert_eq!(render(&Value::Text("a|b".into()), &format), "a\\|b");
        assert_eq!(render(&Value::Text("line1\nline2".into()), &format), "line1\\nline2");
        assert_eq!(render(&Value::Text("C:\\tmp".into()), &format), "C:\\\\tmp");
        assert_eq!(render(&Value::Text("\\N".into()), &format), "\\\\N");
    }

    #[test]
    fn renders_typed_values() {
        let format = CopyFormat::default();
        let ts = NaiveDate::from_ymd_opt(2009, 12, 14)
            .unwrap()
            .and_hms_opt(2, 52, 24)
            .unwrap();
        assert_eq!(render(&Value::Null, &format), "\\N");
        assert_eq!(render(&Value::Int(-42), &format), "-42");
        assert_eq!(render(&Value::Float(3.5), &format), "3.5");
        assert_eq!(render(&Value::Bool(true), &format), "t");
        assert_eq!(render(&Value::Timestamp(ts), &format), "2009-12-14 02:52:24");
        assert_eq!(render(&Value::Date(ts.date()), &format), "2009-12-14");
        assert_eq!(
            render(&Value::Json(serde_json::json!([{"id": 1, "name": "a|b"}])), &format),
            "[{\"id\":1,\"name\":\"a\\|b\"}]"
        );
    }

    #[test]
    fn text_equal_to_custom_sentinel_is_escaped() {
        let format = CopyFormat {
            delimiter: b',',
            null: "null".to_string(),
        };
        let rendered = render(&Value::Text("null".into()), &format);
        assert_eq!(rendered, "n\\ull");

        let decoded = decode_records(format!("{rendered},null\n").as_bytes(), &format, 2).unwrap();
        assert_eq!(decoded, vec![vec![Some("null".to_string()), None]]);
    }

    #[test]
    fn typed_values_equal_to_custom_sentinel_keep_their_value() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let row = [Value::Int(-1), Value::Date(date), Value::Text("-1".into()), Value::Null];

        for null in ["-1", "1970-01-01"] {
            let format = CopyFormat {
                delimiter: b'|',
                null: null.to_string(),
            };
            let line = row.iter().map(|v| render(v, &format)).collect::<Vec<_>>().join("|");
            let decoded = decode_records(format!("{line}\n").as_bytes(), &format, 4).unwrap();
            assert_eq!(
                decoded,
                vec![vec![
                    Some("-1".to_string()),
                    Some("1970-01-01".to_string()),
                    Some("-1".to_string()),
                    None,
                ]],
                "null={null}"
            );
        }
    }

    #[test]
    fn scalars_containing_the_delimiter_are_escaped() {
        let format = CopyFormat {
            delimiter: b':',
            null: "\\N".to_string(),
        };
        let ts = NaiveDate::from_ymd_opt(2009, 12, 14)
            .unwrap()
            .and_hms_opt(2, 52, 24)
            .unwrap();
        assert_eq!(render(&Value::Timestamp(ts), &format), "2009-12-14 02\\:52\\:24");
    }

    #[test]
    fn decode_resolves_escapes() {
        let format = CopyFormat::default();
        let data = b"a\\|b|\\N|x\\ty\\\\z|\\101\\x42\n";
        let records = decode_records(data, &format, 4).unwrap();
        assert_eq!(
            records,
            vec![vec![
                Some("a|b".to_string()),
                None,
                Some("x\ty\\z".to_string()),
                Some("AB".to_string()),
            ]]
        );
    }

    #[test]
    fn decode_rejects_wrong_field_count() {
        let format = CopyFormat::default();
        let err = decode_records(b"1|2|3\n", &format, 2).unwrap_err();
        assert!(err.to_string().contains("expected 2 fields, found 3"));
    }

    #[test]
    fn decode_of_empty_payload_is_empty() {
        let format = CopyFormat::default();
        assert!(decode_records(b"", &format, 3).unwrap().is_empty());
    }
}
