//! Lattice Flow
//!
//! This crate provides the data layer for Lattice applications. It
//! implements:
//!
//! - A single-writer State Cell holding the whole application state
//! - An event pipeline: queue, handlers, coeffects and effects
//! - A memoized subscription graph derived from the state
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `state`: the State Cell and its versioned snapshots
//! - `handler`: event handler and coeffect registries
//! - `fx`: effect descriptions and their interpreter
//! - `dispatch`: the event queue and the optional tokio event loop
//! - `graph`: subscriptions, dependency tracking and change propagation
//! - `runtime`: one application instance tying the above together
//!
//! # Example
//!
//! ```rust
//! use lattice_flow::{Event, Query, Runtime};
//! use serde_json::json;
//!
//! let runtime = Runtime::new(json!({"count": 0}));
//!
//! runtime.register_db_handler("inc", |db, _| {
//!     Ok(json!({"count": db["count"].as_i64().unwrap_or(0) + 1}))
//! });
//! runtime.register_subscription("count", |deps, _| Ok(deps.state()["count"].clone()));
//! runtime.register_subscription("doubled", |deps, _| {
//!     let count = deps.read(&Query::new("count"))?;
//!     Ok(json!(count.as_i64().unwrap_or(0) * 2))
//! });
//!
//! let doubled = runtime.subscribe(Query::new("doubled")).unwrap();
//! assert_eq!(doubled.read().unwrap(), json!(0));
//!
//! runtime.dispatch(Event::new("inc")).unwrap();
//! assert_eq!(doubled.read().unwrap(), json!(2));
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod fx;
pub mod graph;
pub mod handler;
pub mod runtime;
pub mod state;

pub use config::RuntimeConfig;
pub use dispatch::{spawn_event_loop, EventLoop};
pub use error::{BoxError, FlowError, Result};
pub use event::Event;
pub use fx::Effects;
pub use graph::{Deps, Query, Subscription, WatchId};
pub use handler::Coeffects;
pub use runtime::Runtime;
pub use state::Snapshot;
