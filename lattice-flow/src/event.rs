//! Events
//!
//! An event is an identifier plus an ordered payload. Events are built at the
//! dispatch call site, consumed once by the dispatcher and then dropped.
//!
//! Effects that carry events (`dispatch`, `dispatch-n`, `dispatch-later`)
//! encode them as a JSON array `[id, arg0, arg1, ...]`.

use std::fmt;

use serde_json::Value;

use crate::error::{FlowError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: String,
    payload: Vec<Value>,
}

impl Event {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(id: impl Into<String>, payload: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Append one argument to the payload.
    pub fn with(mut self, arg: impl Into<Value>) -> Self {
        self.payload.push(arg.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// The `index`-th payload argument, if present.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.payload.get(index)
    }

    /// Encode as `[id, args...]`.
    pub fn to_value(&self) -> Value {
        let mut items = Vec::with_capacity(self.payload.len() + 1);
        items.push(Value::String(self.id.clone()));
        items.extend(self.payload.iter().cloned());
        Value::Array(items)
    }

    /// Decode an event from `[id, args...]`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| FlowError::invalid_payload("event", "expected an array"))?;
        let (head, rest) = items
            .split_first()
            .ok_or_else(|| FlowError::invalid_payload("event", "empty event vector"))?;
        let id = head
            .as_str()
            .ok_or_else(|| FlowError::invalid_payload("event", "event id must be a string"))?;
        Ok(Self::with_payload(id, rest.to_vec()))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.id)?;
        for arg in &self.payload {
            write!(f, " {}", arg)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_appends_in_order() {
        let event = Event::new("move").with("a").with(3);
        assert_eq!(event.id(), "move");
        assert_eq!(event.payload(), &[json!("a"), json!(3)]);
        assert_eq!(event.arg(1), Some(&json!(3)));
        assert_eq!(event.arg(2), None);
        assert_eq!(event.to_string(), r#"[move "a" 3]"#);
    }

    #[test]
    fn decodes_event_vectors() {
        let event = Event::from_value(&json!(["delete", "a"])).unwrap();
        assert_eq!(event, Event::new("delete").with("a"));
        assert_eq!(event.to_value(), json!(["delete", "a"]));
    }

    #[test]
    fn rejects_malformed_event_vectors() {
        assert!(Event::from_value(&json!("delete")).is_err());
        assert!(Event::from_value(&json!([])).is_err());
        assert!(Event::from_value(&json!([1, 2])).is_err());
    }
}
