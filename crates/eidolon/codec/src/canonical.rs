//! Canonical JSON encoding.
//!
//! Canonical bytes are UTF-8 JSON with object keys sorted at every nesting
//! level, no insignificant whitespace, `,` and `:` as separators, and
//! non-ASCII code points emitted verbatim. Every byte Eidolon writes to
//! durable storage or feeds into a hash goes through [`canonical_bytes`].

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::{CodecError, CodecResult};

/// Encode a JSON value into canonical bytes.
pub fn canonical_bytes(value: &Value) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    write_value(value, &mut out)?;
    Ok(out)
}

/// Encode any serializable value into canonical bytes.
pub fn canonical_bytes_of<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let value = to_value(value)?;
    canonical_bytes(&value)
}

/// Canonical encoding as an owned `String`.
pub fn canonical_string(value: &Value) -> CodecResult<String> {
    let bytes = canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Convert a serializable value into a `serde_json::Value`.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<Value> {
    serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Parse bytes with a standards-conforming parser and re-encode them canonically.
pub fn canonical_roundtrip(bytes: &[u8]) -> CodecResult<Vec<u8>> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    canonical_bytes(&value)
}

/// Parse canonical (or any) JSON bytes into a value.
pub fn from_bytes(bytes: &[u8]) -> CodecResult<Value> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Replace integral floats with integers, recursively.
///
/// `14.0` becomes `14`, `-0.0` becomes `0`; non-integral floats and
/// floats outside the `i64` range are left untouched.
pub fn normalize_number(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(normalize(n)),
        Value::Array(items) => Value::Array(items.iter().map(normalize_number).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize_number(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn normalize(n: &Number) -> Number {
    if n.is_i64() || n.is_u64() {
        return n.clone();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Number::from(f as i64)
        }
        _ => n.clone(),
    }
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if let Some(f) = n.as_f64().filter(|_| n.is_f64()) {
                if !f.is_finite() {
                    return Err(CodecError::Encode(format!("non-finite number {f}")));
                }
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out)?;
                out.push(b':');
                write_value(&map[key], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) -> CodecResult<()> {
    // serde_json escapes quotes, backslashes and control characters only.
    serde_json::to_writer(&mut *out, s).map_err(|e| CodecError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_at_every_level() {
        let v = json!({"b": 1, "a": {"d": [1, {"z": 0, "y": 1}], "c": null}});
        let s = canonical_string(&v).unwrap();
        assert_eq!(s, r#"{"a":{"c":null,"d":[1,{"y":1,"z":0}]},"b":1}"#);
    }

    #[test]
    fn non_ascii_is_preserved() {
        let v = json!({"name": "café ☕"});
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(bytes, "{\"name\":\"café ☕\"}".as_bytes());
    }

    #[test]
    fn control_characters_are_escaped() {
        let v = json!("a\nb\"c");
        assert_eq!(canonical_string(&v).unwrap(), r#""a\nb\"c""#);
    }

    #[test]
    fn roundtrip_is_identity_on_canonical_bytes() {
        let v = json!({"k": [1, 2.5, "x", true, null], "a": {}});
        let once = canonical_bytes(&v).unwrap();
        let twice = canonical_roundtrip(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn roundtrip_rejects_garbage() {
        let err = canonical_roundtrip(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn normalize_integral_floats() {
        let v = json!({"a": 14.0, "b": [2.5, -0.0, 3]});
        assert_eq!(normalize_number(&v), json!({"a": 14, "b": [2.5, 0, 3]}));
    }

    #[test]
    fn canonical_bytes_of_struct() {
        #[derive(Serialize)]
        struct Rec {
            zeta: u8,
            alpha: &'static str,
        }
        let bytes = canonical_bytes_of(&Rec { zeta: 1, alpha: "x" }).unwrap();
        assert_eq!(bytes, br#"{"alpha":"x","zeta":1}"#);
    }
}
