//! Runtime Configuration
//!
//! Knobs that change how the runtime reacts to hot reloads and failures.
//! Every field has a default, so a partial JSON document is enough.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Emit a warning when a handler, effect, coeffect or subscription is
    /// registered under an id that already has one.
    pub warn_on_overwrite: bool,

    /// Drop every queued event after an event fails to process.
    ///
    /// When disabled, only the failing event is dropped and the drain goes
    /// on with the next one.
    pub purge_queue_on_error: bool,

    /// Upper bound on deferred events moved into the queue by a single tick.
    /// `None` moves them all.
    pub max_events_per_tick: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            warn_on_overwrite: true,
            purge_queue_on_error: true,
            max_events_per_tick: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
