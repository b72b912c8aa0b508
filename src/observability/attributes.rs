//! Typed attribute key/values attached to spans, span events and log records.

use std::fmt;

use serde::Serialize;

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        AttributeValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

/// A single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: AttributeValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, AttributeValue::String(value.into()))
    }

    pub fn int(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, AttributeValue::Int(value))
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, AttributeValue::Bool(value))
    }

    pub fn float(key: impl Into<String>, value: f64) -> Self {
        Self::new(key, AttributeValue::Float(value))
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Render attributes as `[k=v k=v]` for console lines.
pub fn render(attrs: &[KeyValue]) -> String {
    let parts: Vec<String> = attrs.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(" "))
}

/// Collect attributes into a JSON object. Later keys overwrite earlier ones.
pub fn to_json_map(attrs: &[KeyValue]) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::with_capacity(attrs.len());
    for kv in attrs {
        let value = serde_json::to_value(&kv.value).unwrap_or(serde_json::Value::Null);
        map.insert(kv.key.clone(), value);
    }
    map
}
