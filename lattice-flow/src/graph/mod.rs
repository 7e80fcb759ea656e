//! Subscription Graph
//!
//! This module implements the memoized derivation graph that sits on top of
//! the State Cell.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - The root node is the State Cell.
//! - Every other node is a subscription: a query plus its cached result.
//! - An edge from A to B means A's last computation read B.
//!
//! Edges are never declared. A thread-local tracking context records what a
//! compute function reads and the graph replaces the node's dependency set
//! after every run.
//!
//! # Design Decisions
//!
//! 1. A centralized node table rather than per-node link lists, because:
//!    - It gives reference counting and collection one owner
//!    - It simplifies cycle detection and invalidation traversal
//!
//! 2. Nodes are indexed both by id and by query for O(1) lookups.
//!
//! 3. Both forward (dependencies) and reverse (dependents) edges are kept:
//!    dirtiness is pushed along dependents, values are pulled along
//!    dependencies.

mod context;
mod engine;
mod node;
mod query;
mod subscription;
mod table;
mod watch;

pub use engine::{ComputeFn, Deps, SubscriptionGraph};
pub use node::{DirtyState, NodeId, NodeKind};
pub use query::Query;
pub use subscription::Subscription;
pub use watch::{WatchFn, WatchId};
