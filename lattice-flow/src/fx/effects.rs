//! Effects Map
//!
//! The value a handler returns: effect ids mapped to payloads, kept in
//! insertion order. Building one performs nothing; the interpreter applies
//! it after the handler has returned.

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::event::Event;

/// Reserved effect id: replace the application state.
pub const DB: &str = "db";
/// Dispatch one event through the queue.
pub const DISPATCH: &str = "dispatch";
/// Dispatch several events through the queue, in order.
pub const DISPATCH_N: &str = "dispatch-n";
/// Dispatch one event on the next tick, optionally after a delay.
pub const DISPATCH_LATER: &str = "dispatch-later";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    entries: IndexMap<String, Value>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the state with `value`.
    pub fn db(self, value: Value) -> Self {
        self.with(DB, value)
    }

    /// Queue `event` behind whatever is already queued.
    ///
    /// A second call overwrites the first; use [`Effects::dispatch_n`] for
    /// several events.
    pub fn dispatch(self, event: Event) -> Self {
        self.with(DISPATCH, event.to_value())
    }

    pub fn dispatch_n(self, events: impl IntoIterator<Item = Event>) -> Self {
        let events = events.into_iter().map(|e| e.to_value()).collect();
        self.with(DISPATCH_N, Value::Array(events))
    }

    /// Queue `event` for the next tick.
    pub fn dispatch_later(self, event: Event) -> Self {
        self.with(DISPATCH_LATER, event.to_value())
    }

    /// Queue `event` for the first tick after `ms` milliseconds.
    pub fn dispatch_after(self, event: Event, ms: u64) -> Self {
        self.with(DISPATCH_LATER, json!({ "ms": ms, "dispatch": event.to_value() }))
    }

    /// Add an arbitrary effect. Re-adding an id keeps its original position
    /// and replaces the payload.
    pub fn with(mut self, effect_id: impl Into<String>, payload: Value) -> Self {
        self.entries.insert(effect_id.into(), payload);
        self
    }

    pub fn get(&self, effect_id: &str) -> Option<&Value> {
        self.entries.get(effect_id)
    }

    pub fn contains(&self, effect_id: &str) -> bool {
        self.entries.contains_key(effect_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in application order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
