use crate::error::{Result, TableKvError};
use serde::Serialize;
use std::fmt;

pub const TAG_INVALID: i64 = 0;
pub const TAG_BOOL: i64 = 1;
pub const TAG_INTEGER: i64 = 2;
pub const TAG_REAL: i64 = 3;
pub const TAG_TEXT: i64 = 4;
pub const TAG_BYTES: i64 = 5;
pub const TAG_JSON: i64 = 6;

/// A setting value. Stored as a byte payload plus an integer type tag.
///
/// `Invalid` is the empty value: it is what [`read`](super::SettingsStore::read)
/// returns for a missing key, and it can also be written.
///
/// Equality compares reals bit for bit, so a stored `NaN` equals itself
/// and `0.0` differs from `-0.0`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    #[default]
    Invalid,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl SettingValue {
    pub fn type_tag(&self) -> i64 {
        match self {
            SettingValue::Invalid => TAG_INVALID,
            SettingValue::Bool(_) => TAG_BOOL,
            SettingValue::Integer(_) => TAG_INTEGER,
            SettingValue::Real(_) => TAG_REAL,
            SettingValue::Text(_) => TAG_TEXT,
            SettingValue::Bytes(_) => TAG_BYTES,
            SettingValue::Json(_) => TAG_JSON,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SettingValue::Invalid => "invalid",
            SettingValue::Bool(_) => "bool",
            SettingValue::Integer(_) => "integer",
            SettingValue::Real(_) => "real",
            SettingValue::Text(_) => "text",
            SettingValue::Bytes(_) => "bytes",
            SettingValue::Json(_) => "json",
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, SettingValue::Invalid)
    }

    /// Payload bytes and type tag. Scalars are stored as their text form.
    pub fn encode(&self) -> (Vec<u8>, i64) {
        let payload = match self {
            SettingValue::Invalid => Vec::new(),
            SettingValue::Bool(b) => b.to_string().into_bytes(),
            SettingValue::Integer(n) => n.to_string().into_bytes(),
            SettingValue::Real(f) => f.to_string().into_bytes(),
            SettingValue::Text(s) => s.as_bytes().to_vec(),
            SettingValue::Bytes(b) => b.clone(),
            SettingValue::Json(v) => v.to_string().into_bytes(),
        };
        (payload, self.type_tag())
    }

    pub fn decode(tag: i64, payload: &[u8]) -> Result<SettingValue> {
        let text = || {
            std::str::from_utf8(payload)
                .map_err(|e| TableKvError::Decode(format!("payload for tag {tag} is not UTF-8: {e}")))
        };
        let parse_err = |what: &str| {
            TableKvError::Decode(format!(
                "cannot parse {what} from {:?}",
                String::from_utf8_lossy(payload)
            ))
        };

        Ok(match tag {
            TAG_INVALID => SettingValue::Invalid,
            TAG_BOOL => SettingValue::Bool(text()?.parse().map_err(|_| parse_err("bool"))?),
            TAG_INTEGER => SettingValue::Integer(text()?.parse().map_err(|_| parse_err("integer"))?),
            TAG_REAL => SettingValue::Real(text()?.parse().map_err(|_| parse_err("real"))?),
            TAG_TEXT => SettingValue::Text(text()?.to_string()),
            TAG_BYTES => SettingValue::Bytes(payload.to_vec()),
            TAG_JSON => SettingValue::Json(serde_json::from_slice(payload)?),
            other => return Err(TableKvError::Decode(format!("unknown type tag {other}"))),
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Real(f) => Some(*f),
            SettingValue::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SettingValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            SettingValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for SettingValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SettingValue::Invalid, SettingValue::Invalid) => true,
            (SettingValue::Bool(a), SettingValue::Bool(b)) => a == b,
            (SettingValue::Integer(a), SettingValue::Integer(b)) => a == b,
            (SettingValue::Real(a), SettingValue::Real(b)) => a.to_bits() == b.to_bits(),
            (SettingValue::Text(a), SettingValue::Text(b)) => a == b,
            (SettingValue::Bytes(a), SettingValue::Bytes(b)) => a == b,
            (SettingValue::Json(a), SettingValue::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Invalid => Ok(()),
            SettingValue::Bool(b) => write!(f, "{b}"),
            SettingValue::Integer(n) => write!(f, "{n}"),
            SettingValue::Real(x) => write!(f, "{x}"),
            SettingValue::Text(s) => f.write_str(s),
            SettingValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            SettingValue::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        SettingValue::Bool(b)
    }
}

impl From<i64> for SettingValue {
    fn from(n: i64) -> Self {
        SettingValue::Integer(n)
    }
}

impl From<i32> for SettingValue {
    fn from(n: i32) -> Self {
        SettingValue::Integer(n.into())
    }
}

impl From<u32> for SettingValue {
    fn from(n: u32) -> Self {
        SettingValue::Integer(n.into())
    }
}

impl From<f64> for SettingValue {
    fn from(f: f64) -> Self {
        SettingValue::Real(f)
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Text(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::Text(s)
    }
}

impl From<Vec<u8>> for SettingValue {
    fn from(b: Vec<u8>) -> Self {
        SettingValue::Bytes(b)
    }
}

impl From<&[u8]> for SettingValue {
    fn from(b: &[u8]) -> Self {
        SettingValue::Bytes(b.to_vec())
    }
}

impl From<serde_json::Value> for SettingValue {
    fn from(v: serde_json::Value) -> Self {
        SettingValue::Json(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_roundtrip_every_kind() {
        let values = vec![
            SettingValue::Invalid,
            SettingValue::Bool(true),
            SettingValue::Integer(-75),
            SettingValue::Integer(i64::MAX),
            SettingValue::Real(0.1),
            SettingValue::Real(-1.5e300),
            SettingValue::Text(String::new()),
            SettingValue::Text("Ada ✓".into()),
            SettingValue::Bytes(vec![0, 255, 10]),
            SettingValue::Json(json!({ "w": 800, "h": [1, 2], "dark": true })),
        ];
        for value in values {
            let (payload, tag) = value.encode();
            assert_eq!(SettingValue::decode(tag, &payload).unwrap(), value);
        }
    }

    #[test]
    fn test_real_equality_is_bitwise() {
        let nan = SettingValue::Real(f64::NAN);
        assert_eq!(nan, nan.clone());
        let (payload, tag) = nan.encode();
        assert_eq!(SettingValue::decode(tag, &payload).unwrap(), nan);

        assert_ne!(SettingValue::Real(0.0), SettingValue::Real(-0.0));
        assert_ne!(SettingValue::Real(1.0), SettingValue::Integer(1));
    }

    #[test]
    fn test_scalars_stored_as_text() {
        assert_eq!(SettingValue::from(75).encode(), (b"75".to_vec(), TAG_INTEGER));
        assert_eq!(SettingValue::from(false).encode(), (b"false".to_vec(), TAG_BOOL));
        assert_eq!(SettingValue::Invalid.encode(), (Vec::new(), TAG_INVALID));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            SettingValue::decode(TAG_INTEGER, b"seventy"),
            Err(TableKvError::Decode(_))
        ));
        assert!(matches!(
            SettingValue::decode(TAG_TEXT, &[0xff, 0xfe]),
            Err(TableKvError::Decode(_))
        ));
        assert!(matches!(
            SettingValue::decode(42, b""),
            Err(TableKvError::Decode(_))
        ));
        assert!(matches!(
            SettingValue::decode(TAG_JSON, b"{"),
            Err(TableKvError::Json(_))
        ));
    }

    #[test]
    fn test_display_and_accessors() {
        assert_eq!(SettingValue::Invalid.to_string(), "");
        assert_eq!(SettingValue::from("dark").to_string(), "dark");
        assert_eq!(SettingValue::from(vec![1u8, 2]).to_string(), "<2 bytes>");
        assert_eq!(SettingValue::from(3).as_f64(), Some(3.0));
        assert_eq!(SettingValue::from("x").as_i64(), None);
        assert!(!SettingValue::default().is_valid());
    }
}
