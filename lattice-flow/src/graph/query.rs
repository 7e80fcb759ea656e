//! Query Descriptors
//!
//! A query names a derived value: the id of a registered subscription plus
//! the parameters it is asked with. Two queries denote the same node exactly
//! when they are structurally equal, so `[item "a"]` and `[item "b"]` get
//! separate nodes while two consumers of `[item "a"]` share one.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    id: String,
    params: Vec<Value>,
}

impl Query {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(id: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            params,
        }
    }

    /// Append one parameter.
    pub fn with(mut self, param: impl Into<Value>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }
}

impl Hash for Query {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.params.len().hash(state);
        for param in &self.params {
            hash_value(param, state);
        }
    }
}

/// Structural hash consistent with `Value`'s `PartialEq`: object keys are
/// visited in sorted order whatever the map's own ordering.
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            n.to_string().hash(state);
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(state);
                hash_value(&map[key.as_str()], state);
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.id)?;
        for param in &self.params {
            write!(f, " {}", param)?;
        }
        write!(f, "]")
    }
}
