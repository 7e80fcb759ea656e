//! Effect Interpreter
//!
//! Applies an [`Effects`] map by looking up each id and invoking the
//! registered effect function with its payload.
//!
//! Order: every id is resolved before anything runs, so a map containing an
//! unknown id is rejected as a whole. Resolved effects are then applied in
//! the map's insertion order.
//!
//! The reserved `db` effect is built in and cannot be overridden. It is the
//! only code path that writes the State Cell.
//!
//! An effect function may fail. Failures that are configuration errors (an
//! effect dispatching an unregistered event) abort the rest of the map and
//! reach the caller; anything else is logged and the remaining effects still
//! run.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;

use super::effects::{Effects, DB, DISPATCH, DISPATCH_LATER, DISPATCH_N};
use crate::error::{BoxError, FlowError, Result};
use crate::event::Event;
use crate::runtime::Runtime;

/// An effect function: performs the world mutation described by `payload`.
pub type EffectFn = dyn Fn(&Runtime, &Value) -> std::result::Result<(), BoxError> + Send + Sync;

pub struct EffectInterpreter {
    effects: DashMap<String, Arc<EffectFn>>,
    warn_on_overwrite: bool,
}

impl EffectInterpreter {
    /// Create an interpreter with the built-in dispatch effects installed.
    pub fn new(warn_on_overwrite: bool) -> Self {
        let interpreter = Self {
            effects: DashMap::new(),
            warn_on_overwrite,
        };
        interpreter.install_builtins();
        interpreter
    }

    fn install_builtins(&self) {
        self.effects.insert(DISPATCH.to_string(), Arc::new(dispatch_fx));
        self.effects.insert(DISPATCH_N.to_string(), Arc::new(dispatch_n_fx));
        self.effects
            .insert(DISPATCH_LATER.to_string(), Arc::new(dispatch_later_fx));
    }

    /// Register `effect` under `effect_id`, replacing any previous one.
    pub fn register<F>(&self, effect_id: impl Into<String>, effect: F) -> Result<()>
    where
        F: Fn(&Runtime, &Value) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let effect_id = effect_id.into();
        if effect_id == DB {
            return Err(FlowError::ReservedEffect { effect: effect_id });
        }
        if self
            .effects
            .insert(effect_id.clone(), Arc::new(effect))
            .is_some()
            && self.warn_on_overwrite
        {
            tracing::warn!(effect = %effect_id, "overwriting effect handler");
        }
        Ok(())
    }

    pub fn unregister(&self, effect_id: &str) -> bool {
        self.effects.remove(effect_id).is_some()
    }

    pub fn contains(&self, effect_id: &str) -> bool {
        effect_id == DB || self.effects.contains_key(effect_id)
    }

    /// Apply every effect in `effects`.
    pub fn interpret(&self, runtime: &Runtime, effects: &Effects) -> Result<()> {
        let mut plan: Vec<(&str, Option<Arc<EffectFn>>, &Value)> = Vec::with_capacity(effects.len());
        for (effect_id, payload) in effects.iter() {
            if effect_id == DB {
                plan.push((effect_id, None, payload));
                continue;
            }
            let effect = self
                .effects
                .get(effect_id)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| FlowError::UnregisteredEffect {
                    effect: effect_id.to_string(),
                })?;
            plan.push((effect_id, Some(effect), payload));
        }

        for (effect_id, effect, payload) in plan {
            let Some(effect) = effect else {
                runtime.replace_state(payload.clone());
                continue;
            };
            tracing::trace!(effect = effect_id, "applying effect");
            if let Err(err) = effect(runtime, payload) {
                match err.downcast::<FlowError>() {
                    Ok(flow) if flow.is_configuration() => return Err(*flow),
                    Ok(flow) => tracing::error!(effect = effect_id, error = %flow, "effect failed"),
                    Err(other) => tracing::error!(effect = effect_id, error = %other, "effect failed"),
                }
            }
        }
        Ok(())
    }

    /// Drop every registered effect and reinstall the built-ins.
    pub fn clear(&self) {
        self.effects.clear();
        self.install_builtins();
    }
}

fn dispatch_fx(runtime: &Runtime, payload: &Value) -> std::result::Result<(), BoxError> {
    runtime.dispatch(Event::from_value(payload)?)?;
    Ok(())
}

fn dispatch_n_fx(runtime: &Runtime, payload: &Value) -> std::result::Result<(), BoxError> {
    let events = payload
        .as_array()
        .ok_or_else(|| FlowError::invalid_payload(DISPATCH_N, "expected an array of events"))?
        .iter()
        .map(Event::from_value)
        .collect::<Result<Vec<_>>>()?;
    for event in events {
        runtime.dispatch(event)?;
    }
    Ok(())
}

/// Payload is either an event vector (next tick) or
/// `{"ms": delay, "dispatch": event}`.
fn dispatch_later_fx(runtime: &Runtime, payload: &Value) -> std::result::Result<(), BoxError> {
    let (event, ms) = match payload {
        Value::Object(map) => {
            let event = map
                .get(DISPATCH)
                .ok_or_else(|| FlowError::invalid_payload(DISPATCH_LATER, "missing `dispatch`"))?;
            let ms = map.get("ms").and_then(Value::as_u64).unwrap_or(0);
            (Event::from_value(event)?, ms)
        }
        other => (Event::from_value(other)?, 0),
    };

    if ms == 0 {
        runtime.dispatch_later(event)?;
        return Ok(());
    }

    // Fail fast on a typo rather than when the timer fires.
    if !runtime.handlers().contains(event.id()) {
        return Err(FlowError::UnregisteredEvent {
            event: event.id().to_string(),
        }
        .into());
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let runtime = runtime.clone();
            handle.spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                if let Err(err) = runtime.dispatch_later(event) {
                    tracing::error!(error = %err, "delayed dispatch failed");
                }
            });
        }
        Err(_) => {
            tracing::warn!(
                event = %event,
                ms,
                "no tokio runtime for delayed dispatch, deferring to next tick"
            );
            runtime.dispatch_later(event)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn db_effect_is_reserved() {
        let interpreter = EffectInterpreter::new(false);
        let err = interpreter.register(DB, |_, _| Ok(())).err().unwrap();
        assert!(matches!(err, FlowError::ReservedEffect { .. }));
        assert!(interpreter.contains(DB));
    }

    #[test]
    fn applies_effects_in_insertion_order() {
        let runtime = Runtime::new(json!({}));
        let log = Arc::new(Mutex::new(Vec::new()));

        for id in ["a", "b", "c"] {
            let log = log.clone();
            runtime
                .register_effect(id, move |_, payload| {
                    log.lock().push(payload.clone());
                    Ok(())
                })
                .unwrap();
        }

        let effects = Effects::new()
            .with("c", json!(1))
            .with("a", json!(2))
            .with("b", json!(3));
        runtime.effects().interpret(&runtime, &effects).unwrap();

        assert_eq!(*log.lock(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn unknown_effect_rejects_whole_map() {
        let runtime = Runtime::new(json!({"n": 0}));
        let effects = Effects::new()
            .db(json!({"n": 1}))
            .with("launch-missiles", json!(true));

        let err = runtime.effects().interpret(&runtime, &effects).err().unwrap();
        assert!(matches!(err, FlowError::UnregisteredEffect { effect } if effect == "launch-missiles"));
        assert_eq!(*runtime.state().value, json!({"n": 0}));
        assert_eq!(runtime.state().version, 0);
    }

    #[test]
    fn failing_effect_does_not_stop_the_rest() {
        let runtime = Runtime::new(json!(0));
        runtime
            .register_effect("flaky", |_, _| Err("network down".into()))
            .unwrap();

        let effects = Effects::new().with("flaky", Value::Null).db(json!(1));
        runtime.effects().interpret(&runtime, &effects).unwrap();
        assert_eq!(*runtime.state().value, json!(1));
    }

    #[test]
    fn empty_effects_map_is_a_no_op() {
        let runtime = Runtime::new(json!(5));
        runtime.effects().interpret(&runtime, &Effects::new()).unwrap();
        assert_eq!(runtime.state().version, 0);
    }

    #[test]
    fn clear_keeps_builtins() {
        let interpreter = EffectInterpreter::new(false);
        interpreter.register("log", |_, _| Ok(())).unwrap();
        interpreter.clear();
        assert!(!interpreter.contains("log"));
        assert!(interpreter.contains(DISPATCH));
        assert!(interpreter.contains(DISPATCH_LATER));
    }
}
