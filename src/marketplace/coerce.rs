//! Total coercions over untyped indexer values
//!
//! None of these fail: malformed input yields a safe default so one bad row
//! field never takes the page down with it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token metadata as stored by the indexer: parsed JSON when possible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenMetadata {
    Json(Value),
    Raw(String),
}

impl TokenMetadata {
    /// Parsed metadata, `None` when the raw string did not parse
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            TokenMetadata::Json(v) => Some(v),
            TokenMetadata::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, TokenMetadata::Raw(_))
    }

    /// String field of an object-shaped metadata document
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.as_json()?.get(field)?.as_str()
    }
}

impl Default for TokenMetadata {
    fn default() -> Self {
        TokenMetadata::Json(Value::Null)
    }
}

/// Numeric value from a JSON number, decimal string or `0x` hex string; 0 otherwise
pub fn as_number(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => parse_u128(s).and_then(|n| u64::try_from(n).ok()).unwrap_or(0),
        Some(Value::Bool(b)) => u64::from(*b),
        _ => 0,
    }
}

/// Like [`as_number`] but wide enough for token amounts and prices
pub fn as_bigint(value: Option<&Value>) -> u128 {
    match value {
        Some(Value::Number(n)) => n.as_u64().map(u128::from).unwrap_or(0),
        Some(Value::String(s)) => parse_u128(s).unwrap_or(0),
        _ => 0,
    }
}

/// String form of a scalar; empty for null, arrays and objects
pub fn as_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Metadata column decode. JSON strings are parsed; a string that is not
/// JSON is kept verbatim.
pub fn parse_json_safe(value: Option<&Value>) -> TokenMetadata {
    match value {
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) => TokenMetadata::Json(parsed),
            Err(_) => TokenMetadata::Raw(s.clone()),
        },
        Some(other) => TokenMetadata::Json(other.clone()),
        None => TokenMetadata::default(),
    }
}

fn parse_u128(s: &str) -> Option<u128> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => Some(0),
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => s.parse::<u128>().ok(),
    }
}

/// Canonical token id: lowercase `0x` hex without leading zeros.
///
/// Accepts decimal, hex and `contract:token` composite ids. Values too wide
/// for `u128` keep their hex digits.
pub fn normalize_token_id(raw: &str) -> String {
    let raw = raw.trim();
    let id = raw.rsplit_once(':').map(|(_, id)| id).unwrap_or(raw);
    if let Some(hex) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
        let digits = hex.trim_start_matches('0').to_ascii_lowercase();
        return if digits.is_empty() {
            "0x0".to_string()
        } else {
            format!("0x{digits}")
        };
    }
    match id.parse::<u128>() {
        Ok(n) => format!("{n:#x}"),
        Err(_) => id.to_ascii_lowercase(),
    }
}

/// Split a u256 into `(low, high)` 128-bit felts as hex strings
pub fn u256_calldata(value: u128) -> [String; 2] {
    [format!("{value:#x}"), "0x0".to_string()]
}
