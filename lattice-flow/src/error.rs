//! Error Types
//!
//! Everything the runtime can surface to a caller lives in [`FlowError`].
//!
//! Two families matter:
//!
//! - Configuration errors (an unregistered event, effect, coeffect or query,
//!   a cyclic subscription) are programming mistakes. The offending operation
//!   aborts and the error is returned to the caller.
//! - Execution errors (`Handler`, `Compute`) wrap a failure raised by
//!   application code. They never leave the State Cell half-written.

use thiserror::Error;

/// Error type returned by application callbacks (handlers, compute functions).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("no handler registered for event `{event}`")]
    UnregisteredEvent { event: String },

    #[error("no effect handler registered for `{effect}`")]
    UnregisteredEffect { effect: String },

    #[error("no coeffect injector registered for `{coeffect}` (requested by `{event}`)")]
    UnregisteredCoeffect { coeffect: String, event: String },

    #[error("no subscription registered for query `{query}`")]
    UnregisteredQuery { query: String },

    #[error("effect `{effect}` is reserved and cannot be registered")]
    ReservedEffect { effect: String },

    #[error("cyclic subscription dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("handler for `{event}` failed: {source}")]
    Handler {
        event: String,
        #[source]
        source: BoxError,
    },

    #[error("computing `{query}` failed: {source}")]
    Compute {
        query: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid payload for `{id}`: {reason}")]
    InvalidPayload { id: String, reason: String },
}

impl FlowError {
    /// Whether this error is a configuration mistake rather than a failure
    /// raised by application code.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FlowError::UnregisteredEvent { .. }
                | FlowError::UnregisteredEffect { .. }
                | FlowError::UnregisteredCoeffect { .. }
                | FlowError::UnregisteredQuery { .. }
                | FlowError::ReservedEffect { .. }
                | FlowError::CyclicDependency { .. }
        )
    }

    pub(crate) fn invalid_payload(id: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::InvalidPayload {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Recover a `FlowError` that travelled through application code as a
    /// [`BoxError`] (for example a cycle detected in a nested read), or wrap
    /// the foreign error with `wrap`.
    pub(crate) fn from_boxed(err: BoxError, wrap: impl FnOnce(BoxError) -> FlowError) -> Self {
        match err.downcast::<FlowError>() {
            Ok(flow) => *flow,
            Err(other) => wrap(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_renders_path() {
        let err = FlowError::CyclicDependency {
            path: vec!["[a]".into(), "[b]".into(), "[a]".into()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic subscription dependency: [a] -> [b] -> [a]"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn from_boxed_unwraps_flow_errors() {
        let boxed: BoxError = Box::new(FlowError::UnregisteredQuery { query: "x".into() });
        let err = FlowError::from_boxed(boxed, |source| FlowError::Compute {
            query: "outer".into(),
            source,
        });
        assert!(matches!(err, FlowError::UnregisteredQuery { .. }));
    }

    #[test]
    fn from_boxed_wraps_foreign_errors() {
        let boxed: BoxError = "boom".into();
        let err = FlowError::from_boxed(boxed, |source| FlowError::Compute {
            query: "[total]".into(),
            source,
        });
        assert!(!err.is_configuration());
        assert_eq!(err.to_string(), "computing `[total]` failed: boom");
    }
}
