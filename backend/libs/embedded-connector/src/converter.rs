//! Key/value converters used to serialize offsets for the backing store.

use crate::error::{OffsetError, OffsetResult};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Converts structured offset data to and from the bytes held by an offset store.
pub trait Converter: Send + Sync {
    fn to_bytes(&self, value: &Value) -> OffsetResult<Vec<u8>>;

    fn from_bytes(&self, bytes: &[u8]) -> OffsetResult<Value>;
}

/// Schemaless JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl Converter for JsonConverter {
    fn to_bytes(&self, value: &Value) -> OffsetResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn from_bytes(&self, bytes: &[u8]) -> OffsetResult<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Plain UTF-8 text. Strings are written verbatim, anything else as compact JSON.
///
/// Reading always yields a `Value::String`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl Converter for StringConverter {
    fn to_bytes(&self, value: &Value) -> OffsetResult<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Ok(other.to_string().into_bytes()),
        }
    }

    fn from_bytes(&self, bytes: &[u8]) -> OffsetResult<Value> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| OffsetError::Corrupt(format!("offset key is not UTF-8: {}", e)))?;
        Ok(Value::String(text.to_string()))
    }
}

/// Built-in converter selection, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    String,
    Json,
}

impl ConverterKind {
    /// Parse a configured converter name. Accepts the short name in any case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" => Some(ConverterKind::String),
            "json" => Some(ConverterKind::Json),
            _ => None,
        }
    }

    /// Instantiate the converter.
    pub fn create(self) -> Arc<dyn Converter> {
        match self {
            ConverterKind::String => Arc::new(StringConverter),
            ConverterKind::Json => Arc::new(JsonConverter),
        }
    }
}

impl fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConverterKind::String => write!(f, "string"),
            ConverterKind::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_converter_preserves_structure() {
        let converter = JsonConverter;
        let value = json!({"lsn": 1234, "snapshot": false});
        let bytes = converter.to_bytes(&value).unwrap();
        assert_eq!(converter.from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn test_json_converter_rejects_garbage() {
        let result = JsonConverter.from_bytes(b"{not json");
        assert!(matches!(result, Err(OffsetError::Serialization(_))));
    }

    #[test]
    fn test_string_converter_writes_strings_verbatim() {
        let bytes = StringConverter.to_bytes(&json!("orders")).unwrap();
        assert_eq!(bytes, b"orders");
    }

    #[test]
    fn test_string_converter_renders_structured_keys_as_json() {
        let key = json!(["inventory", {"table": "orders"}]);
        let bytes = StringConverter.to_bytes(&key).unwrap();
        assert_eq!(bytes, br#"["inventory",{"table":"orders"}]"#);
    }

    #[test]
    fn test_converter_kind_parse() {
        assert_eq!(ConverterKind::parse("JSON"), Some(ConverterKind::Json));
        assert_eq!(ConverterKind::parse(" string "), Some(ConverterKind::String));
        assert_eq!(ConverterKind::parse("avro"), None);
        assert_eq!(ConverterKind::Json.to_string(), "json");
    }
}
