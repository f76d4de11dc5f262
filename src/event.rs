//! Structured events handed to sinks, and the values they carry.

use std::fmt;

use serde::Serialize;
use serde::ser::SerializeMap;

/// Value of a single event field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(v) => f.write_str(v),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl log::kv::ToValue for Value {
    fn to_value(&self) -> log::kv::Value<'_> {
        match self {
            Value::Str(v) => log::kv::Value::from(v.as_str()),
            Value::Int(v) => log::kv::Value::from(*v),
            Value::Float(v) => log::kv::Value::from(*v),
            Value::Bool(v) => log::kv::Value::from(*v),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Str(v) => serializer.serialize_str(v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Bool(v) => serializer.serialize_bool(*v),
        }
    }
}

/// One structured access log event: string keys with typed values, in insertion order.
///
/// Contributors attached to a log entry receive the event after the fixed
/// fields have been written and add their own:
///
/// ```rust
/// use actix_web_middleware_accesslog::Event;
///
/// let mut event = Event::new();
/// event.str("user", "alice").int("items", 3);
/// assert_eq!(event.get("items").map(|v| v.to_string()), Some("3".to_string()));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    fields: Vec<(String, Value)>,
}

impl Event {
    pub fn new() -> Self {
        Event::default()
    }

    pub fn str(&mut self, key: impl Into<String>, val: impl Into<String>) -> &mut Self {
        self.push(key, Value::Str(val.into()))
    }

    pub fn int(&mut self, key: impl Into<String>, val: i64) -> &mut Self {
        self.push(key, Value::Int(val))
    }

    pub fn float(&mut self, key: impl Into<String>, val: f64) -> &mut Self {
        self.push(key, Value::Float(val))
    }

    pub fn bool(&mut self, key: impl Into<String>, val: bool) -> &mut Self {
        self.push(key, Value::Bool(val))
    }

    /// Adds `val` serialized as JSON text. The field is left out if serialization fails.
    pub fn json<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, val: &T) -> &mut Self {
        match serde_json::to_string(val) {
            Ok(text) => self.push(key, Value::Str(text)),
            Err(err) => {
                log::debug!("skipping access log field: {err}");
                self
            }
        }
    }

    /// Adds an already encoded JSON document as text. Invalid JSON is left out.
    pub fn raw_json(&mut self, key: impl Into<String>, raw: &[u8]) -> &mut Self {
        if serde_json::from_slice::<serde::de::IgnoredAny>(raw).is_err() {
            return self;
        }
        match std::str::from_utf8(raw) {
            Ok(text) => self.push(key, Value::Str(text.to_string())),
            Err(_) => self,
        }
    }

    /// First value recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push(&mut self, key: impl Into<String>, val: Value) -> &mut Self {
        self.fields.push((key.into(), val));
        self
    }
}

impl Serialize for Event {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
