//! Event Handlers
//!
//! Handlers are pure: they receive [`Coeffects`] and an [`Event`] and return
//! an [`Effects`] description. They never touch the State Cell directly.
//! Because of that, replaying a recorded event against a recorded snapshot
//! reproduces the same effects.
//!
//! [`Event`]: crate::event::Event
//! [`Effects`]: crate::fx::Effects

mod coeffects;
mod registry;

pub use coeffects::Coeffects;
pub use registry::{EventHandler, HandlerFn, HandlerRegistry, InjectorFn};
