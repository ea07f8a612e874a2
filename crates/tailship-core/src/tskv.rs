//! TSKV row encoding
//!
//! A row is written as a single line:
//!
//! ```text
//! tskv\t<key1>=<value1>\t<key2>=<value2>...
//! ```
//!
//! Keys and values are backslash-escaped independently. Values escape
//! `\0 \r \n \t \\`; keys additionally escape `=` so that the first unescaped
//! `=` of a field always separates key from value. String values are written
//! verbatim, every other JSON value is written as compact JSON text.

use serde_json::Value;

use crate::Row;
use crate::error::{CodecError, CodecResult};

/// Literal tag every encoded row starts with
pub const TSKV_SENTINEL: &str = "tskv";

/// Characters escaped in field names
pub const KEY_ESCAPE: &[char] = &['\0', '\r', '\n', '\t', '\\', '='];

/// Characters escaped in field values
pub const VALUE_ESCAPE: &[char] = &['\0', '\r', '\n', '\t', '\\'];

fn escape_letter(c: char) -> char {
    match c {
        '\0' => '0',
        '\r' => 'r',
        '\n' => 'n',
        '\t' => 't',
        other => other,
    }
}

fn unescape_letter(c: char) -> Option<char> {
    match c {
        '0' => Some('\0'),
        'r' => Some('\r'),
        'n' => Some('\n'),
        't' => Some('\t'),
        '\\' => Some('\\'),
        '=' => Some('='),
        _ => None,
    }
}

/// Escape every character of `escape_chars` found in `input`
pub fn escape_encode(input: &str, escape_chars: &[char]) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if escape_chars.contains(&c) {
            out.push('\\');
            out.push(escape_letter(c));
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverse [`escape_encode`] for either escape set
pub fn escape_decode(input: &str) -> CodecResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let next = chars
            .next()
            .ok_or_else(|| CodecError::InvalidEscape(format!("trailing backslash in {input:?}")))?;
        let decoded =
            unescape_letter(next).ok_or_else(|| CodecError::InvalidEscape(format!("\\{next}")))?;
        out.push(decoded);
    }
    Ok(out)
}

/// Encode a row as a TSKV line (without the trailing newline)
pub fn encode_row(row: &Row) -> CodecResult<String> {
    let mut line = String::from(TSKV_SENTINEL);
    for (key, value) in row {
        let text = match value {
            Value::String(s) => escape_encode(s, VALUE_ESCAPE),
            other => escape_encode(&serde_json::to_string(other)?, VALUE_ESCAPE),
        };
        line.push('\t');
        line.push_str(&escape_encode(key, KEY_ESCAPE));
        line.push('=');
        line.push_str(&text);
    }
    Ok(line)
}

/// Byte offset of the first `=` not preceded by an escaping backslash
fn find_separator(field: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, c) in field.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '=' => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Decode a TSKV line back into a row
///
/// Values are JSON-decoded when possible and kept as strings otherwise.
pub fn decode_row(line: &str) -> CodecResult<Row> {
    let mut fields = line.split('\t');
    match fields.next() {
        Some(TSKV_SENTINEL) => {}
        other => {
            return Err(CodecError::malformed_row(format!(
                "expected {TSKV_SENTINEL:?} tag, found {:?}",
                other.unwrap_or_default()
            )));
        }
    }

    let mut row = Row::new();
    for field in fields {
        let sep = find_separator(field)
            .ok_or_else(|| CodecError::malformed_row(format!("field without '=': {field:?}")))?;
        let key = escape_decode(&field[..sep])?;
        let raw = escape_decode(&field[sep + 1..])?;
        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        row.insert(key, value);
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_escape_roundtrip_reserved_chars() {
        let input = "a\0b\rc\nd\te\\f=g";
        let encoded = escape_encode(input, KEY_ESCAPE);
        assert_eq!(encoded, "a\\0b\\rc\\nd\\te\\\\f\\=g");
        assert_eq!(escape_decode(&encoded).unwrap(), input);
    }

    #[test]
    fn test_value_escape_keeps_equals() {
        assert_eq!(escape_encode("x=1", VALUE_ESCAPE), "x=1");
        assert_eq!(escape_encode("x=1", KEY_ESCAPE), "x\\=1");
    }

    #[test]
    fn test_escape_decode_rejects_unknown_sequence() {
        assert!(matches!(
            escape_decode("bad\\q"),
            Err(CodecError::InvalidEscape(_))
        ));
        assert!(matches!(
            escape_decode("dangling\\"),
            Err(CodecError::InvalidEscape(_))
        ));
    }

    #[test]
    fn test_encode_row_format() {
        let r = row(json!({"a": 1, "b": "text"}));
        assert_eq!(encode_row(&r).unwrap(), "tskv\ta=1\tb=text");
    }

    #[test]
    fn test_encode_empty_row() {
        assert_eq!(encode_row(&Row::new()).unwrap(), "tskv");
        assert!(decode_row("tskv").unwrap().is_empty());
    }

    #[test]
    fn test_row_roundtrip_with_nested_values() {
        let r = row(json!({
            "event_type": "operation_completed",
            "duration": 12.5,
            "success": true,
            "spec": {"pool": "research", "weights": [1, 2, 3]},
            "note": "line one\nline two\twith tab",
            "odd=key": "back\\slash",
            "nothing": null,
        }));
        let line = encode_row(&r).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(decode_row(&line).unwrap(), r);
    }

    #[test]
    fn test_encode_is_idempotent_through_decode() {
        let r = row(json!({"k": [1, {"x": "y"}], "s": "plain"}));
        let first = encode_row(&r).unwrap();
        let second = encode_row(&decode_row(&first).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_splits_on_first_unescaped_equals() {
        let decoded = decode_row("tskv\tk\\=ey=va=lue").unwrap();
        assert_eq!(decoded.get("k=ey"), Some(&json!("va=lue")));
    }

    #[test]
    fn test_decode_falls_back_to_string() {
        let decoded = decode_row("tskv\tmsg={not json").unwrap();
        assert_eq!(decoded.get("msg"), Some(&json!("{not json")));
    }

    #[test]
    fn test_decode_rejects_missing_sentinel() {
        assert!(matches!(
            decode_row("kv\ta=1"),
            Err(CodecError::MalformedRow(_))
        ));
    }

    #[test]
    fn test_decode_rejects_field_without_separator() {
        assert!(matches!(
            decode_row("tskv\tnoequals"),
            Err(CodecError::MalformedRow(_))
        ));
    }
}
