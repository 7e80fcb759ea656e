//! Subscription Handles
//!
//! A [`Subscription`] is a counted reference to one node. Cloning it adds a
//! reference, dropping it removes one; when the last handle (and the last
//! consumer edge) goes away the node is detached and its memoized value
//! freed. Watchers registered through a handle are removed with it.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::engine::SubscriptionGraph;
use super::node::NodeId;
use super::query::Query;
use super::watch::{WatchId, Watcher};
use crate::error::{FlowError, Result};

pub struct Subscription {
    graph: Arc<SubscriptionGraph>,
    node: NodeId,
    query: Query,
    watches: Mutex<Vec<WatchId>>,
}

impl Subscription {
    pub(crate) fn new(graph: Arc<SubscriptionGraph>, node: NodeId, query: Query) -> Self {
        Self {
            graph,
            node,
            query,
            watches: Mutex::new(Vec::new()),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The node's current value, recomputing whatever is stale.
    pub fn read(&self) -> Result<Value> {
        self.graph.read_node(self.node, &self.query)
    }

    /// Call `callback` with the new value each time this node recomputes to
    /// a value different from the previous one.
    pub fn on_change<F>(&self, callback: F) -> Result<WatchId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self
            .graph
            .watch(self.node, Watcher::new(callback))
            .ok_or_else(|| FlowError::UnregisteredQuery {
                query: self.query.to_string(),
            })?;
        self.watches.lock().push(id);
        Ok(id)
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        self.watches.lock().retain(|w| *w != id);
        self.graph.unwatch(self.node, id)
    }

    /// How many times the node's compute function has produced a value.
    pub fn compute_count(&self) -> usize {
        self.graph.compute_count(self.node)
    }

    pub fn is_clean(&self) -> bool {
        self.graph.is_clean(&self.query).unwrap_or(false)
    }

    /// Release this handle. Same as dropping it.
    pub fn unsubscribe(self) {}
}

impl Clone for Subscription {
    fn clone(&self) -> Self {
        self.graph.retain(self.node);
        Self::new(Arc::clone(&self.graph), self.node, self.query.clone())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for id in self.watches.get_mut().drain(..) {
            self.graph.unwatch(self.node, id);
        }
        self.graph.release(self.node);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("query", &self.query.to_string())
            .field("node", &self.node.raw())
            .field("compute_count", &self.compute_count())
            .finish()
    }
}
