//! Graph Nodes
//!
//! This module defines the nodes that live in the subscription graph.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use smallvec::SmallVec;

use super::query::Query;
use super::watch::{WatchId, Watcher};

/// Unique identifier for a node in the subscription graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of node in the subscription graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The State Cell. It has no dependencies, only dependents, and is
    /// never collected.
    Root,

    /// A memoized derivation over the root and other derived nodes.
    Derived,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The cached value is up-to-date.
    Clean,

    /// Something this node transitively depends on changed. Its direct
    /// inputs must be brought up to date before deciding whether to
    /// recompute.
    MaybeDirty,

    /// A direct input changed. The node must recompute.
    Dirty,
}

pub(crate) type DependencyList = SmallVec<[NodeId; 4]>;

/// A node in the subscription graph.
pub(crate) struct Node {
    id: NodeId,
    kind: NodeKind,
    query: Option<Query>,
    dirty: DirtyState,

    /// Set while the node's compute function is on the stack.
    computing: bool,

    value: Option<Value>,

    /// Nodes read during the last successful computation, in read order.
    dependencies: DependencyList,

    /// Nodes whose last computation read this node.
    dependents: HashSet<NodeId>,

    /// External handles plus incoming dependent edges.
    refs: usize,

    compute_count: usize,
    watchers: Vec<Watcher>,
}

impl Node {
    pub fn root() -> Self {
        Self::new(NodeKind::Root, None)
    }

    pub fn derived(query: Query) -> Self {
        Self::new(NodeKind::Derived, Some(query))
    }

    fn new(kind: NodeKind, query: Option<Query>) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            query,
            dirty: match kind {
                NodeKind::Root => DirtyState::Clean,
                // Start dirty so the first read computes.
                NodeKind::Derived => DirtyState::Dirty,
            },
            computing: false,
            value: None,
            dependencies: DependencyList::new(),
            dependents: HashSet::new(),
            refs: 0,
            compute_count: 0,
            watchers: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    /// Label used in logs and cycle reports.
    pub fn label(&self) -> String {
        match &self.query {
            Some(query) => query.to_string(),
            None => "<state>".to_string(),
        }
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Only a clean node is downgraded; a dirty one stays dirty.
    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub fn is_computing(&self) -> bool {
        self.computing
    }

    pub fn set_computing(&mut self, computing: bool) {
        self.computing = computing;
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Store a freshly computed value, keeping the old one if they are equal.
    pub fn store(&mut self, value: Value) -> StoreOutcome {
        self.compute_count += 1;
        match &self.value {
            Some(old) if *old == value => StoreOutcome::Unchanged,
            Some(_) => {
                self.value = Some(value);
                StoreOutcome::Changed
            }
            None => {
                self.value = Some(value);
                StoreOutcome::Initial
            }
        }
    }

    pub fn compute_count(&self) -> usize {
        self.compute_count
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn replace_dependencies(&mut self, deps: DependencyList) -> DependencyList {
        std::mem::replace(&mut self.dependencies, deps)
    }

    pub fn dependents(&self) -> &HashSet<NodeId> {
        &self.dependents
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.remove(&node_id);
    }

    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn retain(&mut self) {
        self.refs += 1;
    }

    /// Drop one reference. Returns true when none are left.
    pub fn release(&mut self) -> bool {
        self.refs = self.refs.saturating_sub(1);
        self.refs == 0
    }

    pub fn add_watcher(&mut self, watcher: Watcher) {
        self.watchers.push(watcher);
    }

    pub fn remove_watcher(&mut self, id: WatchId) -> bool {
        let before = self.watchers.len();
        self.watchers.retain(|w| w.id() != id);
        self.watchers.len() != before
    }

    pub fn watchers(&self) -> &[Watcher] {
        &self.watchers
    }
}

/// What [`Node::store`] did with a computed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreOutcome {
    /// First value ever computed for the node.
    Initial,
    /// Equal to the cached value; nothing downstream needs to know.
    Unchanged,
    Changed,
}
