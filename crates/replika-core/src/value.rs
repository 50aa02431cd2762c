//! Values held by registers, sets and used as map keys.
//!
//! `Value` is a closed union: a structured message (type url + encoded
//! bytes), a JSON document, or a primitive. Values are totally ordered so
//! they can be stored in ordered sets and used as map keys; floats are
//! ordered with `f64::total_cmp`.

use crate::error::{DataError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// An encoded structured message, e.g. a protobuf `Any`.
    Message { type_url: String, data: Vec<u8> },
    /// A JSON document in canonical (sorted key) text form.
    Json(String),
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn message(type_url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Value::Message {
            type_url: type_url.into(),
            data: data.into(),
        }
    }

    /// Wrap a JSON document. Object keys are sorted, so equal documents
    /// produce equal values.
    pub fn json(document: &serde_json::Value) -> Self {
        Value::Json(document.to_string())
    }

    /// Encode any serializable type as a JSON value.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        let document = serde_json::to_value(value)?;
        Ok(Value::json(&document))
    }

    /// Decode this value into `T` through its JSON form.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json()?)?)
    }

    /// The JSON form of this value. Messages and raw bytes have none.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        match self {
            Value::Json(text) => Ok(serde_json::from_str(text)?),
            Value::String(s) => Ok(serde_json::Value::String(s.clone())),
            Value::Int(i) => Ok(serde_json::Value::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| DataError::Serialization(format!("{} is not a JSON number", f))),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Message { type_url, .. } => Err(DataError::Serialization(format!(
                "message {} has no JSON form",
                type_url
            ))),
            Value::Bytes(_) => Err(DataError::Serialization(
                "bytes have no JSON form".to_string(),
            )),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The type url and payload of a message value.
    pub fn as_message(&self) -> Option<(&str, &[u8])> {
        match self {
            Value::Message { type_url, data } => Some((type_url, data)),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Message { .. } => 0,
            Value::Json(_) => 1,
            Value::String(_) => 2,
            Value::Bytes(_) => 3,
            Value::Int(_) => 4,
            Value::Float(_) => 5,
            Value::Bool(_) => 6,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Value::Message { type_url: a, data: x },
                Value::Message { type_url: b, data: y },
            ) => a.cmp(b).then_with(|| x.cmp(y)),
            (Value::Json(a), Value::Json(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Message { type_url, data } => {
                type_url.hash(state);
                data.hash(state);
            }
            Value::Json(s) | Value::String(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Message { type_url, data } => write!(f, "{}({} bytes)", type_url, data.len()),
            Value::Json(text) => f.write_str(text),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(document: serde_json::Value) -> Self {
        Value::json(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        sku: String,
        quantity: u32,
    }

    #[test]
    fn test_json_values_are_canonical() {
        let a = Value::json(&json!({"b": 1, "a": [true, null]}));
        let b = Value::json(&json!({"a": [true, null], "b": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_decode_structs() {
        let item = Item {
            sku: "A-1".to_string(),
            quantity: 3,
        };
        let value = Value::encode(&item).unwrap();
        assert!(matches!(value, Value::Json(_)));
        assert_eq!(value.decode::<Item>().unwrap(), item);
    }

    #[test]
    fn test_primitives_decode_through_json() {
        assert_eq!(Value::from(7).decode::<i64>().unwrap(), 7);
        assert_eq!(Value::from("x").decode::<String>().unwrap(), "x");
        assert!(Value::from(vec![1u8, 2]).to_json().is_err());
        assert!(Value::message("type.googleapis.com/Foo", vec![0u8])
            .decode::<String>()
            .is_err());
    }

    #[test]
    fn test_total_order_across_variants() {
        let mut set = BTreeSet::new();
        set.insert(Value::from(true));
        set.insert(Value::from(1.5));
        set.insert(Value::from(f64::NAN));
        set.insert(Value::from(1));
        set.insert(Value::from("a"));
        set.insert(Value::from("a"));
        assert_eq!(set.len(), 5);
        assert_eq!(set.iter().next(), Some(&Value::from("a")));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from("s").as_str(), Some("s"));
        assert_eq!(Value::from(2).as_int(), Some(2));
        assert_eq!(Value::from(false).as_bool(), Some(false));
        assert_eq!(Value::from(2.5).as_float(), Some(2.5));
        assert_eq!(Value::from(vec![9u8]).as_bytes(), Some(&[9u8][..]));
        let msg = Value::message("t", vec![1u8]);
        assert_eq!(msg.as_message(), Some(("t", &[1u8][..])));
        assert_eq!(Value::from(2).as_str(), None);
    }

    #[test]
    fn test_value_serialization() {
        let value = Value::message("type.googleapis.com/Cart", vec![1u8, 2, 3]);
        let serialized = serde_json::to_string(&value).unwrap();
        let deserialized: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, value);
    }
}
