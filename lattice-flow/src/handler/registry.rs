//! Handler Registry
//!
//! Maps event ids to handlers, and coeffect ids to the injectors that fill
//! them in. Registration is last-write-wins so a hot reload can swap a
//! handler in place; overwriting logs a warning when configured to.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::coeffects::Coeffects;
use crate::error::{BoxError, FlowError, Result};
use crate::event::Event;
use crate::fx::Effects;
use crate::state::Snapshot;

/// A pure event handler: coeffects and event in, effects description out.
pub type HandlerFn =
    dyn Fn(&Coeffects, &Event) -> std::result::Result<Effects, BoxError> + Send + Sync;

/// Fills one entry of a [`Coeffects`] before the handler runs.
pub type InjectorFn = dyn Fn(&mut Coeffects) + Send + Sync;

/// A registered handler together with the coeffects it asked for.
pub struct EventHandler {
    coeffects: Vec<String>,
    handler: Arc<HandlerFn>,
}

impl EventHandler {
    /// Ids of the coeffects injected before this handler runs, in order.
    pub fn coeffects(&self) -> &[String] {
        &self.coeffects
    }

    pub fn call(&self, cofx: &Coeffects, event: &Event) -> std::result::Result<Effects, BoxError> {
        (self.handler)(cofx, event)
    }
}

pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<EventHandler>>,
    injectors: DashMap<String, Arc<InjectorFn>>,
    warn_on_overwrite: bool,
}

impl HandlerRegistry {
    pub fn new(warn_on_overwrite: bool) -> Self {
        Self {
            handlers: DashMap::new(),
            injectors: DashMap::new(),
            warn_on_overwrite,
        }
    }

    /// Register `handler` for `event_id`, replacing any previous one.
    pub fn register<F>(&self, event_id: impl Into<String>, handler: F)
    where
        F: Fn(&Coeffects, &Event) -> std::result::Result<Effects, BoxError> + Send + Sync + 'static,
    {
        self.register_with_coeffects(event_id, &[], handler);
    }

    /// Register a handler that needs the listed coeffects injected first.
    pub fn register_with_coeffects<F>(
        &self,
        event_id: impl Into<String>,
        coeffects: &[&str],
        handler: F,
    ) where
        F: Fn(&Coeffects, &Event) -> std::result::Result<Effects, BoxError> + Send + Sync + 'static,
    {
        let event_id = event_id.into();
        let entry = EventHandler {
            coeffects: coeffects.iter().map(|id| id.to_string()).collect(),
            handler: Arc::new(handler),
        };
        if self.handlers.insert(event_id.clone(), Arc::new(entry)).is_some() && self.warn_on_overwrite
        {
            tracing::warn!(event = %event_id, "overwriting event handler");
        }
    }

    /// Register a handler that only computes a new state from the old one.
    /// Its result becomes a `db` effect.
    pub fn register_db<F>(&self, event_id: impl Into<String>, handler: F)
    where
        F: Fn(&Value, &Event) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.register(event_id, move |cofx, event| {
            Ok(Effects::new().db(handler(cofx.db(), event)?))
        });
    }

    pub fn unregister(&self, event_id: &str) -> bool {
        self.handlers.remove(event_id).is_some()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.handlers.contains_key(event_id)
    }

    /// Look up the handler for `event_id`.
    pub fn resolve(&self, event_id: &str) -> Result<Arc<EventHandler>> {
        self.handlers
            .get(event_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| FlowError::UnregisteredEvent {
                event: event_id.to_string(),
            })
    }

    pub fn register_coeffect<F>(&self, coeffect_id: impl Into<String>, injector: F)
    where
        F: Fn(&mut Coeffects) + Send + Sync + 'static,
    {
        let coeffect_id = coeffect_id.into();
        if self
            .injectors
            .insert(coeffect_id.clone(), Arc::new(injector))
            .is_some()
            && self.warn_on_overwrite
        {
            tracing::warn!(coeffect = %coeffect_id, "overwriting coeffect injector");
        }
    }

    /// Assemble the coeffects `handler` asked for.
    ///
    /// Every requested injector is resolved before any of them runs, so a
    /// missing one fails the dispatch without side effects.
    pub fn build_coeffects(
        &self,
        handler: &EventHandler,
        snapshot: Snapshot,
        event: Event,
    ) -> Result<Coeffects> {
        let injectors = handler
            .coeffects()
            .iter()
            .map(|id| {
                self.injectors
                    .get(id)
                    .map(|entry| Arc::clone(entry.value()))
                    .ok_or_else(|| FlowError::UnregisteredCoeffect {
                        coeffect: id.clone(),
                        event: event.id().to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut cofx = Coeffects::new(snapshot, event);
        for inject in injectors {
            inject(&mut cofx);
        }
        Ok(cofx)
    }

    pub fn clear(&self) {
        self.handlers.clear();
        self.injectors.clear();
    }
}
