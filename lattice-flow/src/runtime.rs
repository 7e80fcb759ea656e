//! Runtime
//!
//! The runtime is one application instance: it owns the State Cell, the
//! registries, the event queue and the subscription graph, and connects them.
//!
//! # How It Works
//!
//! 1. `dispatch` checks the event has a handler and enqueues it.
//!
//! 2. The drainer processes queued events one at a time:
//!    a. Build the coeffects (state snapshot plus requested injections)
//!    b. Call the handler, which returns an effects description
//!    c. Interpret the effects; `db` swaps the state and bumps its version
//!    d. Invalidation marks the subscriptions reading the state dirty
//!    e. Watched subscriptions are refreshed and their watchers notified
//!
//! 3. Unwatched subscriptions stay dirty until someone reads them.
//!
//! # Thread Safety
//!
//! `Runtime` is a cheap `Clone` around shared state and can be used from any
//! thread. Only one thread drains the queue at a time, so effect
//! interpretations never overlap and the State Cell has a single writer.

use std::sync::Arc;

use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::dispatch::{DrainClaim, EventQueue};
use crate::error::{BoxError, FlowError, Result};
use crate::event::Event;
use crate::fx::{EffectInterpreter, Effects};
use crate::graph::{Deps, Query, Subscription, SubscriptionGraph};
use crate::handler::{Coeffects, HandlerRegistry};
use crate::state::{Snapshot, StateCell};

struct RuntimeInner {
    config: RuntimeConfig,
    state: Arc<StateCell>,
    handlers: HandlerRegistry,
    effects: EffectInterpreter,
    graph: Arc<SubscriptionGraph>,
    queue: EventQueue,
}

/// Handle to an application instance. Clones share the instance.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(initial: Value) -> Self {
        Self::with_config(initial, RuntimeConfig::default())
    }

    pub fn with_config(initial: Value, config: RuntimeConfig) -> Self {
        let state = Arc::new(StateCell::new(initial));
        let warn = config.warn_on_overwrite;
        Self {
            inner: Arc::new(RuntimeInner {
                handlers: HandlerRegistry::new(warn),
                effects: EffectInterpreter::new(warn),
                graph: Arc::new(SubscriptionGraph::new(Arc::clone(&state), warn)),
                queue: EventQueue::new(),
                state,
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Read-only snapshot of the current state.
    pub fn state(&self) -> Snapshot {
        self.inner.state.snapshot()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }

    pub fn effects(&self) -> &EffectInterpreter {
        &self.inner.effects
    }

    pub fn graph(&self) -> &Arc<SubscriptionGraph> {
        &self.inner.graph
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn register_handler<F>(&self, event_id: impl Into<String>, handler: F)
    where
        F: Fn(&Coeffects, &Event) -> std::result::Result<Effects, BoxError> + Send + Sync + 'static,
    {
        self.inner.handlers.register(event_id, handler);
    }

    pub fn register_handler_with_coeffects<F>(
        &self,
        event_id: impl Into<String>,
        coeffects: &[&str],
        handler: F,
    ) where
        F: Fn(&Coeffects, &Event) -> std::result::Result<Effects, BoxError> + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .register_with_coeffects(event_id, coeffects, handler);
    }

    pub fn register_db_handler<F>(&self, event_id: impl Into<String>, handler: F)
    where
        F: Fn(&Value, &Event) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.inner.handlers.register_db(event_id, handler);
    }

    pub fn register_coeffect<F>(&self, coeffect_id: impl Into<String>, injector: F)
    where
        F: Fn(&mut Coeffects) + Send + Sync + 'static,
    {
        self.inner.handlers.register_coeffect(coeffect_id, injector);
    }

    pub fn register_effect<F>(&self, effect_id: impl Into<String>, effect: F) -> Result<()>
    where
        F: Fn(&Runtime, &Value) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.inner.effects.register(effect_id, effect)
    }

    pub fn register_subscription<F>(&self, query_id: impl Into<String>, compute: F)
    where
        F: Fn(&Deps<'_>, &Query) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.inner.graph.register(query_id, compute);
    }

    pub fn subscribe(&self, query: Query) -> Result<Subscription> {
        self.inner.graph.subscribe(query)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Enqueue `event`, processing the queue now unless a drain is already
    /// running (in which case `event` runs after what is ahead of it).
    ///
    /// Returns the first error raised while this call was draining.
    pub fn dispatch(&self, event: Event) -> Result<()> {
        self.inner.handlers.resolve(event.id())?;
        tracing::trace!(event = %event, "dispatch");
        match self.inner.queue.push(event) {
            Some(claim) => self.drain(claim),
            None => Ok(()),
        }
    }

    /// Enqueue `event` for the next [`Runtime::tick`].
    pub fn dispatch_later(&self, event: Event) -> Result<()> {
        self.inner.handlers.resolve(event.id())?;
        tracing::trace!(event = %event, "dispatch later");
        self.inner.queue.push_later(event);
        Ok(())
    }

    /// Process the events deferred so far. Events deferred while this tick
    /// runs wait for the next one.
    pub fn tick(&self) -> Result<()> {
        match self.inner.queue.promote(self.inner.config.max_events_per_tick) {
            Some(claim) => self.drain(claim),
            None => Ok(()),
        }
    }

    /// `(ready, deferred)` event counts.
    pub fn pending(&self) -> (usize, usize) {
        self.inner.queue.pending()
    }

    pub(crate) async fn deferred_ready(&self) {
        self.inner.queue.deferred_ready().await;
    }

    fn drain(&self, mut claim: DrainClaim<'_>) -> Result<()> {
        let mut first_error = None;
        while let Some(event) = claim.next() {
            let label = event.to_string();
            if let Err(err) = self.process(event) {
                tracing::error!(event = %label, error = %err, "event processing failed");
                if self.inner.config.purge_queue_on_error {
                    let dropped = self.inner.queue.purge();
                    if dropped > 0 {
                        tracing::warn!(dropped, "purged event queue after failure");
                    }
                }
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn process(&self, event: Event) -> Result<()> {
        let handler = self.inner.handlers.resolve(event.id())?;
        let cofx = self
            .inner
            .handlers
            .build_coeffects(&handler, self.inner.state.snapshot(), event.clone())?;

        tracing::debug!(event = %event, version = cofx.version(), "handling event");
        let effects = handler.call(&cofx, &event).map_err(|err| {
            FlowError::from_boxed(err, |source| FlowError::Handler {
                event: event.id().to_string(),
                source,
            })
        })?;

        // Effects applied before a failing one stay applied, so watchers
        // still hear about them.
        let applied = self.inner.effects.interpret(self, &effects);
        self.inner.graph.flush();
        applied
    }

    /// The `db` effect. The only write path into the State Cell.
    pub(crate) fn replace_state(&self, value: Value) {
        let version = self.inner.state.replace(value);
        tracing::debug!(version, "state replaced");
        self.inner.graph.invalidate_root();
    }

    /// Drop queued events, registrations and subscriptions and reset the
    /// state to `null`. Outstanding subscription handles become inert.
    pub fn teardown(&self) {
        self.inner.queue.clear();
        self.inner.handlers.clear();
        self.inner.effects.clear();
        self.inner.graph.clear();
        self.inner.state.reset(Value::Null);
        tracing::debug!("runtime torn down");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (ready, deferred) = self.pending();
        f.debug_struct("Runtime")
            .field("version", &self.inner.state.version())
            .field("ready", &ready)
            .field("deferred", &deferred)
            .field("subscriptions", &self.inner.graph.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn logging_runtime() -> (Runtime, Arc<Mutex<Vec<String>>>) {
        let runtime = Runtime::new(json!({}));
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in ["e1", "e2", "e3"] {
            let log = log.clone();
            runtime.register_handler(id, move |_, event| {
                log.lock().push(event.id().to_string());
                Ok(Effects::new())
            });
        }
        (runtime, log)
    }

    #[test]
    fn dispatch_processes_immediately_when_idle() {
        let runtime = Runtime::new(json!({"n": 0}));
        runtime.register_db_handler("inc", |db, _| {
            Ok(json!({"n": db["n"].as_i64().unwrap_or(0) + 1}))
        });

        runtime.dispatch(Event::new("inc")).unwrap();
        runtime.dispatch(Event::new("inc")).unwrap();

        assert_eq!(*runtime.state().value, json!({"n": 2}));
        assert_eq!(runtime.state().version, 2);
        assert_eq!(runtime.pending(), (0, 0));
    }

    #[test]
    fn unregistered_event_leaves_state_alone() {
        let runtime = Runtime::new(json!({"n": 0}));
        let err = runtime.dispatch(Event::new("nonexistent")).err().unwrap();

        assert!(err.is_configuration());
        assert!(matches!(err, FlowError::UnregisteredEvent { .. }));
        assert_eq!(*runtime.state().value, json!({"n": 0}));
        assert_eq!(runtime.state().version, 0);
    }

    #[test]
    fn failing_handler_leaves_state_alone() {
        let runtime = Runtime::new(json!({"n": 0}));
        runtime.register_handler("explode", |_, _| Err("kaboom".into()));

        let err = runtime.dispatch(Event::new("explode")).err().unwrap();
        assert!(matches!(err, FlowError::Handler { ref event, .. } if event == "explode"));
        assert_eq!(runtime.state().version, 0);
    }

    #[test]
    fn nested_dispatch_runs_before_later_outer_dispatch() {
        let (runtime, log) = logging_runtime();
        let inner_log = log.clone();
        runtime.register_handler("e1", move |_, _| {
            inner_log.lock().push("e1".into());
            Ok(Effects::new().dispatch(Event::new("e3")))
        });

        runtime.dispatch(Event::new("e1")).unwrap();
        runtime.dispatch(Event::new("e2")).unwrap();

        assert_eq!(*log.lock(), vec!["e1", "e3", "e2"]);
    }

    #[test]
    fn dispatch_later_waits_for_tick() {
        let (runtime, log) = logging_runtime();
        let inner_log = log.clone();
        runtime.register_handler("e1", move |_, _| {
            inner_log.lock().push("e1".into());
            Ok(Effects::new().dispatch_later(Event::new("e3")))
        });

        runtime.dispatch(Event::new("e1")).unwrap();
        runtime.dispatch(Event::new("e2")).unwrap();
        assert_eq!(runtime.pending(), (0, 1));

        runtime.tick().unwrap();
        assert_eq!(*log.lock(), vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn failure_purges_the_queue() {
        let (runtime, log) = logging_runtime();
        runtime.register_handler("boom", |_, _| Err("no".into()));
        runtime.register_handler("start", |_, _| {
            Ok(Effects::new().dispatch_n([Event::new("boom"), Event::new("e2")]))
        });

        assert!(runtime.dispatch(Event::new("start")).is_err());
        assert!(log.lock().is_empty());
        assert_eq!(runtime.pending(), (0, 0));
    }

    #[test]
    fn failure_without_purge_keeps_draining() {
        let config = RuntimeConfig {
            purge_queue_on_error: false,
            ..RuntimeConfig::default()
        };
        let runtime = Runtime::with_config(json!({}), config);
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        runtime.register_handler("ok", move |_, _| {
            log_clone.lock().push("ok");
            Ok(Effects::new())
        });
        runtime.register_handler("boom", |_, _| Err("no".into()));
        runtime.register_handler("start", |_, _| {
            Ok(Effects::new().dispatch_n([Event::new("boom"), Event::new("ok")]))
        });

        assert!(runtime.dispatch(Event::new("start")).is_err());
        assert_eq!(*log.lock(), vec!["ok"]);
    }

    #[test]
    fn effect_dispatching_unregistered_event_surfaces() {
        let runtime = Runtime::new(json!({}));
        runtime.register_handler("go", |_, _| {
            Ok(Effects::new().dispatch(Event::new("nowhere")))
        });

        let err = runtime.dispatch(Event::new("go")).err().unwrap();
        assert!(matches!(err, FlowError::UnregisteredEvent { ref event } if event == "nowhere"));
    }

    #[test]
    fn coeffects_are_injected_per_dispatch() {
        let runtime = Runtime::new(json!({"ids": []}));
        let counter = Arc::new(Mutex::new(0u64));
        let counter_clone = counter.clone();
        runtime.register_coeffect("next-id", move |cofx| {
            let mut counter = counter_clone.lock();
            *counter += 1;
            cofx.insert("next-id", json!(*counter));
        });
        runtime.register_handler_with_coeffects("add", &["next-id"], |cofx, _| {
            let mut ids = cofx.db()["ids"].as_array().cloned().unwrap_or_default();
            ids.push(cofx.get("next-id").cloned().unwrap_or(Value::Null));
            Ok(Effects::new().db(json!({ "ids": ids })))
        });

        runtime.dispatch(Event::new("add")).unwrap();
        runtime.dispatch(Event::new("add")).unwrap();
        assert_eq!(*runtime.state().value, json!({"ids": [1, 2]}));
    }

    #[test]
    fn teardown_resets_everything() {
        let runtime = Runtime::new(json!({"n": 1}));
        runtime.register_db_handler("noop", |db, _| Ok(db.clone()));
        runtime.register_subscription("n", |deps, _| Ok(deps.state()["n"].clone()));
        let sub = runtime.subscribe(Query::new("n")).unwrap();
        assert_eq!(sub.read().unwrap(), json!(1));

        runtime.teardown();

        assert_eq!(*runtime.state().value, Value::Null);
        assert!(runtime.dispatch(Event::new("noop")).is_err());
        assert!(sub.read().is_err());
        assert_eq!(runtime.graph().node_count(), 0);
    }

    #[test]
    fn watchers_hear_state_written_before_a_failing_effect() {
        let runtime = Runtime::new(json!({"n": 0}));
        runtime.register_handler("half-done", |_, _| {
            Ok(Effects::new()
                .db(json!({"n": 1}))
                .dispatch(Event::new("nowhere")))
        });
        runtime.register_subscription("n", |deps, _| Ok(deps.state()["n"].clone()));
        let n = runtime.subscribe(Query::new("n")).unwrap();
        n.read().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        n.on_change(move |value| seen_clone.lock().push(value.clone()))
            .unwrap();

        let err = runtime.dispatch(Event::new("half-done")).err().unwrap();
        assert!(matches!(err, FlowError::UnregisteredEvent { .. }));
        assert_eq!(*runtime.state().value, json!({"n": 1}));
        assert_eq!(*seen.lock(), vec![json!(1)]);
        assert!(n.is_clean());
    }

    #[test]
    fn panicking_handler_does_not_wedge_the_queue() {
        let runtime = Runtime::new(json!({"n": 0}));
        runtime.register_handler("panic", |_, _| panic!("handler bug"));
        runtime.register_db_handler("inc", |db, _| {
            Ok(json!({"n": db["n"].as_i64().unwrap_or(0) + 1}))
        });

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            runtime.dispatch(Event::new("panic"))
        }));
        assert!(caught.is_err());

        runtime.dispatch(Event::new("inc")).unwrap();
        assert_eq!(*runtime.state().value, json!({"n": 1}));
        assert_eq!(runtime.pending(), (0, 0));
    }
}
