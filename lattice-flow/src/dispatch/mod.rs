//! Dispatcher
//!
//! Events are processed one at a time, in the order they were enqueued.
//!
//! Two modes:
//!
//! - `dispatch`: enqueue behind whatever is queued. If nothing is being
//!   processed the caller processes the queue right away. An event
//!   dispatched from inside an effect therefore runs after the current
//!   event and before anything dispatched later by the outer caller.
//! - `dispatch_later`: enqueue for the next tick. Used to break re-entrancy,
//!   for example from a render callback.
//!
//! The processing itself (coeffects, handler, effects) lives on
//! [`Runtime`](crate::runtime::Runtime).

mod event_loop;
mod queue;

pub use event_loop::{spawn_event_loop, EventLoop};
pub(crate) use queue::{DrainClaim, EventQueue};
