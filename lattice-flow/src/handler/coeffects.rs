//! Coeffects
//!
//! The inputs a handler sees. A fresh `Coeffects` is assembled for every
//! dispatch: the state snapshot and the event are always present, anything
//! else (a clock reading, a random seed, a generated id) is inserted by the
//! injectors the handler asked for.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::event::Event;
use crate::state::Snapshot;

#[derive(Debug, Clone)]
pub struct Coeffects {
    db: Arc<Value>,
    version: u64,
    event: Event,
    injected: IndexMap<String, Value>,
}

impl Coeffects {
    pub(crate) fn new(snapshot: Snapshot, event: Event) -> Self {
        Self {
            db: snapshot.value,
            version: snapshot.version,
            event,
            injected: IndexMap::new(),
        }
    }

    /// The state value at the time the event was picked up.
    pub fn db(&self) -> &Value {
        &self.db
    }

    /// Version of the state snapshot in [`Coeffects::db`].
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// An injected coeffect by id.
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.injected.get(id)
    }

    /// Called by injectors. A later insert under the same id wins.
    pub fn insert(&mut self, id: impl Into<String>, value: Value) {
        self.injected.insert(id.into(), value);
    }

    /// Injected coeffects, in injection order.
    pub fn injected(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.injected.iter().map(|(k, v)| (k.as_str(), v))
    }
}
