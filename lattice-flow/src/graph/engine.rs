//! Subscription Graph
//!
//! The pull half of push-dirty, pull-compute. Reading a node brings it up to
//! date with the least work possible:
//!
//! - `Clean`: return the cached value.
//! - `MaybeDirty`: refresh the recorded dependencies in read order. If one
//!   of them actually changed it marks this node `Dirty` and we recompute;
//!   otherwise the node is clean again without running its compute function.
//! - `Dirty`: recompute. The new value is compared with the cached one and
//!   only a real change marks the direct dependents `Dirty`.
//!
//! # Locking
//!
//! The node table sits behind a mutex that is never held while application
//! code runs. Recomputation is serialized by a reentrant gate so that nested
//! reads from a compute function re-enter freely on the same thread while
//! other threads wait. Clean reads skip the gate entirely.
//!
//! Watcher callbacks are queued while the graph works and delivered once the
//! outermost read returns.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;

use super::context::TrackingScope;
use super::node::{DirtyState, NodeId, StoreOutcome};
use super::query::Query;
use super::subscription::Subscription;
use super::table::NodeTable;
use super::watch::{WatchId, Watcher};
use crate::error::{BoxError, FlowError, Result};
use crate::state::{Snapshot, StateCell};

/// A compute function: derives a value from the state and other queries.
pub type ComputeFn =
    dyn Fn(&Deps<'_>, &Query) -> std::result::Result<Value, BoxError> + Send + Sync;

/// What a compute function can read. Every read is recorded as a dependency
/// of the node being computed.
pub struct Deps<'a> {
    graph: &'a SubscriptionGraph,
    root: NodeId,
    snapshot: Snapshot,
}

impl Deps<'_> {
    /// The application state, as of when this computation started.
    pub fn state(&self) -> &Value {
        TrackingScope::track(self.root);
        &self.snapshot.value
    }

    /// Read another subscription.
    pub fn read(&self, query: &Query) -> Result<Value> {
        let id = self.graph.node_for(query)?;
        self.graph.read_node(id, query)
    }
}

pub struct SubscriptionGraph {
    state: Arc<StateCell>,
    computes: DashMap<String, Arc<ComputeFn>>,
    nodes: Mutex<NodeTable>,
    gate: ReentrantMutex<()>,
    warn_on_overwrite: bool,
}

impl SubscriptionGraph {
    pub fn new(state: Arc<StateCell>, warn_on_overwrite: bool) -> Self {
        Self {
            state,
            computes: DashMap::new(),
            nodes: Mutex::new(NodeTable::new()),
            gate: ReentrantMutex::new(()),
            warn_on_overwrite,
        }
    }

    /// Register the compute function for `query_id`.
    ///
    /// Re-registering swaps the function and marks every live node for that
    /// id dirty, so the next read uses the new definition.
    pub fn register<F>(&self, query_id: impl Into<String>, compute: F)
    where
        F: Fn(&Deps<'_>, &Query) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        let query_id = query_id.into();
        let replaced = self
            .computes
            .insert(query_id.clone(), Arc::new(compute))
            .is_some();
        if !replaced {
            return;
        }
        if self.warn_on_overwrite {
            tracing::warn!(query = %query_id, "overwriting subscription");
        }
        let mut nodes = self.nodes.lock();
        for id in nodes.ids_for(&query_id) {
            nodes.invalidate_node(id);
        }
    }

    pub fn contains(&self, query_id: &str) -> bool {
        self.computes.contains_key(query_id)
    }

    /// Get a handle to the node for `query`, creating it if needed. The
    /// compute function does not run until the first read.
    pub fn subscribe(self: &Arc<Self>, query: Query) -> Result<Subscription> {
        if !self.computes.contains_key(query.id()) {
            return Err(FlowError::UnregisteredQuery {
                query: query.to_string(),
            });
        }
        let id = {
            let mut nodes = self.nodes.lock();
            let id = nodes.get_or_create(&query);
            nodes.retain(id);
            id
        };
        Ok(Subscription::new(Arc::clone(self), id, query))
    }

    /// Derived nodes currently alive.
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// `Some(true)` when a node exists for `query` and its cache is valid.
    pub fn is_clean(&self, query: &Query) -> Option<bool> {
        let nodes = self.nodes.lock();
        let id = nodes.lookup(query)?;
        nodes.get(id).map(|node| node.is_clean())
    }

    /// The State Cell was written: invalidate everything reading it.
    pub(crate) fn invalidate_root(&self) {
        let mut nodes = self.nodes.lock();
        let root = nodes.root();
        nodes.invalidate(root, false);
    }

    /// Bring every watched node up to date, firing watchers for the ones
    /// whose value changed. Nodes never computed are left alone.
    pub(crate) fn flush(&self) {
        let targets: Vec<NodeId> = {
            let nodes = self.nodes.lock();
            nodes
                .watched()
                .into_iter()
                .filter(|id| {
                    nodes
                        .get(*id)
                        .is_some_and(|node| !node.is_clean() && node.value().is_some())
                })
                .collect()
        };
        if !targets.is_empty() {
            let _gate = self.gate.lock();
            for id in targets {
                if let Err(err) = self.refresh(id) {
                    tracing::error!(error = %err, "refreshing watched subscription failed");
                }
            }
        }
        self.deliver_notifications();
    }

    /// Drop every compute function and node.
    pub(crate) fn clear(&self) {
        let _gate = self.gate.lock();
        self.computes.clear();
        *self.nodes.lock() = NodeTable::new();
    }

    pub(crate) fn retain(&self, id: NodeId) {
        self.nodes.lock().retain(id);
    }

    /// Drop one reference. Waits for any recompute in progress so a node
    /// read by that computation is not collected before its edge exists.
    pub(crate) fn release(&self, id: NodeId) {
        let _gate = self.gate.lock();
        self.nodes.lock().release(id);
    }

    pub(crate) fn watch(&self, id: NodeId, watcher: Watcher) -> Option<WatchId> {
        let watch_id = watcher.id();
        let mut nodes = self.nodes.lock();
        let node = nodes.get_mut(id)?;
        node.add_watcher(watcher);
        Some(watch_id)
    }

    pub(crate) fn unwatch(&self, id: NodeId, watch_id: WatchId) -> bool {
        self.nodes
            .lock()
            .get_mut(id)
            .is_some_and(|node| node.remove_watcher(watch_id))
    }

    pub(crate) fn compute_count(&self, id: NodeId) -> usize {
        self.nodes
            .lock()
            .get(id)
            .map(|node| node.compute_count())
            .unwrap_or(0)
    }

    pub(crate) fn state_of(&self, id: NodeId) -> Option<DirtyState> {
        self.nodes.lock().get(id).map(|node| node.dirty_state())
    }

    fn node_for(&self, query: &Query) -> Result<NodeId> {
        if !self.computes.contains_key(query.id()) {
            return Err(FlowError::UnregisteredQuery {
                query: query.to_string(),
            });
        }
        Ok(self.nodes.lock().get_or_create(query))
    }

    /// Read `id`, recording it as a dependency of whatever is computing.
    pub(crate) fn read_node(&self, id: NodeId, query: &Query) -> Result<Value> {
        if TrackingScope::contains(id) {
            return Err(FlowError::CyclicDependency {
                path: TrackingScope::cycle_path(id),
            });
        }
        let tracking = TrackingScope::is_active();
        if tracking {
            TrackingScope::track(id);
        }

        {
            let nodes = self.nodes.lock();
            match nodes.get(id) {
                None => {
                    return Err(FlowError::UnregisteredQuery {
                        query: query.to_string(),
                    })
                }
                Some(node) if node.is_clean() && !node.is_computing() => {
                    if let Some(value) = node.value() {
                        return Ok(value.clone());
                    }
                }
                Some(_) => {}
            }
        }

        let result = {
            let _gate = self.gate.lock();
            self.refresh(id).and_then(|()| self.cached(id, query))
        };
        if !tracking {
            self.deliver_notifications();
        }
        result
    }

    fn cached(&self, id: NodeId, query: &Query) -> Result<Value> {
        self.nodes
            .lock()
            .get(id)
            .and_then(|node| node.value().cloned())
            .ok_or_else(|| FlowError::UnregisteredQuery {
                query: query.to_string(),
            })
    }

    /// Make `id` clean. Caller holds the gate.
    fn refresh(&self, id: NodeId) -> Result<()> {
        let (state, deps, root, label) = {
            let nodes = self.nodes.lock();
            let Some(node) = nodes.get(id) else {
                return Ok(());
            };
            (
                node.dirty_state(),
                node.dependencies().to_vec(),
                nodes.root(),
                node.label(),
            )
        };

        match state {
            DirtyState::Clean => Ok(()),
            DirtyState::Dirty => self.recompute(id),
            DirtyState::MaybeDirty => {
                // `id` is on the stack while its inputs refresh: one of them
                // reading it back is a cycle.
                let scope = TrackingScope::enter(id, label);
                for dep in deps {
                    // A root change marks readers dirty directly, never maybe.
                    if dep == root {
                        continue;
                    }
                    self.refresh(dep)?;
                    if self.state_of(id) == Some(DirtyState::Dirty) {
                        break;
                    }
                }
                scope.finish();
                let still_dirty = {
                    let mut nodes = self.nodes.lock();
                    match nodes.get_mut(id) {
                        Some(node) if node.dirty_state() == DirtyState::MaybeDirty => {
                            node.mark_clean();
                            false
                        }
                        Some(node) => node.dirty_state() == DirtyState::Dirty,
                        None => false,
                    }
                };
                if still_dirty {
                    self.recompute(id)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Run `id`'s compute function. Caller holds the gate.
    fn recompute(&self, id: NodeId) -> Result<()> {
        if TrackingScope::contains(id) {
            return Err(FlowError::CyclicDependency {
                path: TrackingScope::cycle_path(id),
            });
        }

        let (query, label, root) = {
            let mut nodes = self.nodes.lock();
            let root = nodes.root();
            let Some(node) = nodes.get_mut(id) else {
                return Ok(());
            };
            let Some(query) = node.query().cloned() else {
                return Ok(());
            };
            // Optimistically clean: an invalidation arriving while the
            // compute function runs flips it back.
            node.mark_clean();
            node.set_computing(true);
            let label = node.label();
            (query, label, root)
        };

        let Some(compute) = self.computes.get(query.id()).map(|c| Arc::clone(c.value())) else {
            self.abort(id);
            return Err(FlowError::UnregisteredQuery {
                query: query.to_string(),
            });
        };

        tracing::debug!(query = %query, "recomputing subscription");
        let scope = TrackingScope::enter(id, label);
        let deps = Deps {
            graph: self,
            root,
            snapshot: self.state.snapshot(),
        };
        let outcome = compute(&deps, &query);
        let reads = scope.finish();

        let mut nodes = self.nodes.lock();
        match outcome {
            Ok(value) => {
                nodes.install_dependencies(id, reads);
                let Some(node) = nodes.get_mut(id) else {
                    return Ok(());
                };
                node.set_computing(false);
                if node.store(value) == StoreOutcome::Changed {
                    if let Some(value) = node.value().cloned() {
                        let callbacks: Vec<_> =
                            node.watchers().iter().map(|w| w.callback()).collect();
                        for callback in callbacks {
                            nodes.push_notification((callback, value.clone()));
                        }
                    }
                    nodes.invalidate(id, true);
                }
                Ok(())
            }
            Err(err) => {
                if let Some(node) = nodes.get_mut(id) {
                    node.set_computing(false);
                    node.mark_dirty();
                }
                let kept: Vec<NodeId> = nodes
                    .get(id)
                    .map(|node| node.dependencies().to_vec())
                    .unwrap_or_default();
                let fresh: Vec<NodeId> = reads.into_iter().filter(|r| !kept.contains(r)).collect();
                nodes.sweep(&fresh);
                drop(nodes);
                Err(FlowError::from_boxed(err, |source| FlowError::Compute {
                    query: query.to_string(),
                    source,
                }))
            }
        }
    }

    fn abort(&self, id: NodeId) {
        if let Some(node) = self.nodes.lock().get_mut(id) {
            node.set_computing(false);
            node.mark_dirty();
        }
    }

    fn deliver_notifications(&self) {
        let pending = self.nodes.lock().take_notifications();
        for (callback, value) in pending {
            callback(&value);
        }
    }
}
