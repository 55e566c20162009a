//! Key/value data carried between stages.
//!
//! Task input and output are flat maps from string keys to scalar values.
//! Keeping them flat (no nesting) mirrors what a stage is allowed to hand to
//! the next one and keeps merging rules trivial.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A scalar value stored in a [`Data`] map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl DataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::Str(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::Str(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Int(value)
    }
}

impl From<u32> for DataValue {
    fn from(value: u32) -> Self {
        DataValue::Int(i64::from(value))
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Bool(value)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Float(value)
    }
}

/// Errors converting between a [`Data`] map and a typed value.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("value is not a flat map of scalars: {0}")]
    NotFlat(String),

    #[error("json conversion: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat string-keyed map of scalars. Iteration order is the key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Data(BTreeMap<String, DataValue>);

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(DataValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build the input of the next stage.
    ///
    /// Constants always win: an upstream key only lands in the result when
    /// `constants` does not define it.
    pub fn merge_under_constants(upstream: &Data, constants: &Data) -> Data {
        let mut merged = constants.clone();
        for (key, value) in &upstream.0 {
            merged.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
        merged
    }

    /// Decode into a typed value through JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DataError> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Encode a typed value. The value must serialize to an object whose
    /// fields are scalars; `null` fields are dropped.
    pub fn encode<T: Serialize>(value: &T) -> Result<Data, DataError> {
        match serde_json::to_value(value)? {
            serde_json::Value::Null => Ok(Data::new()),
            serde_json::Value::Object(map) => {
                let mut data = Data::new();
                for (key, field) in map {
                    let scalar = match field {
                        serde_json::Value::Null => continue,
                        serde_json::Value::Bool(b) => DataValue::Bool(b),
                        serde_json::Value::Number(n) => match n.as_i64() {
                            Some(i) => DataValue::Int(i),
                            None => DataValue::Float(n.as_f64().unwrap_or_default()),
                        },
                        serde_json::Value::String(s) => DataValue::Str(s),
                        other => return Err(DataError::NotFlat(format!("{key}={other}"))),
                    };
                    data.0.insert(key, scalar);
                }
                Ok(data)
            }
            other => Err(DataError::NotFlat(other.to_string())),
        }
    }
}

impl<K: Into<String>, V: Into<DataValue>> FromIterator<(K, V)> for Data {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut data = Data::new();
        for (key, value) in iter {
            data.insert(key, value);
        }
        data
    }
}
