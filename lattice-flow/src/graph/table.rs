//! Node Table & Invalidation
//!
//! The table owns every node of one subscription graph, indexed by id and by
//! query, and maintains both edge directions. It also implements the push
//! half of push-dirty, pull-compute:
//!
//! 1. When a node changes, mark its direct dependents `Dirty`.
//! 2. Propagate `MaybeDirty` to their dependents, transitively (BFS).
//! 3. Stop there. Nothing is recomputed until someone reads.
//!
//! Reference counts live on the nodes. A node reaching zero is removed and
//! its outgoing edges released, which may cascade to its own dependencies.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use super::node::{DependencyList, Node, NodeId};
use super::query::Query;
use super::watch::WatchFn;

/// A watcher callback paired with the value it should receive.
pub(crate) type Notification = (Arc<WatchFn>, Value);

pub(crate) struct NodeTable {
    nodes: HashMap<NodeId, Node>,
    by_query: HashMap<Query, NodeId>,
    /// Live nodes per query id, for hot reloads.
    by_query_id: HashMap<String, HashSet<NodeId>>,
    root: NodeId,
    /// Callbacks owed to watchers, delivered outside the lock.
    pending: Vec<Notification>,
}

impl NodeTable {
    pub fn new() -> Self {
        let root = Node::root();
        let root_id = root.id();
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            nodes,
            by_query: HashMap::new(),
            by_query_id: HashMap::new(),
            root: root_id,
            pending: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn lookup(&self, query: &Query) -> Option<NodeId> {
        self.by_query.get(query).copied()
    }

    /// The node for `query`, created dirty with no references if missing.
    pub fn get_or_create(&mut self, query: &Query) -> NodeId {
        if let Some(id) = self.by_query.get(query) {
            return *id;
        }
        let node = Node::derived(query.clone());
        let id = node.id();
        tracing::trace!(query = %query, "creating subscription node");
        self.nodes.insert(id, node);
        self.by_query.insert(query.clone(), id);
        self.by_query_id
            .entry(query.id().to_string())
            .or_default()
            .insert(id);
        id
    }

    /// Derived nodes currently alive.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn ids_for(&self, query_id: &str) -> Vec<NodeId> {
        self.by_query_id
            .get(query_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Derived nodes with at least one watcher, oldest first.
    pub fn watched(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| !node.watchers().is_empty())
            .map(|node| node.id())
            .collect();
        ids.sort();
        ids
    }

    pub fn retain(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.retain();
                true
            }
            None => false,
        }
    }

    /// Drop one reference to `id`, collecting it (and anything only it kept
    /// alive) once none are left.
    pub fn release(&mut self, id: NodeId) {
        let mut worklist = vec![id];
        while let Some(id) = worklist.pop() {
            if id == self.root {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.release() {
                worklist.extend(self.remove(id));
            }
        }
    }

    /// Collect nodes in `candidates` that nothing references.
    pub fn sweep(&mut self, candidates: &[NodeId]) {
        for &id in candidates {
            if id == self.root {
                continue;
            }
            if self.nodes.get(&id).is_some_and(|node| node.refs() == 0) {
                let orphans = self.remove(id);
                for orphan in orphans {
                    self.release(orphan);
                }
            }
        }
    }

    /// Remove a node and its outgoing edges. Returns the dependencies whose
    /// reference it held, for the caller to release.
    fn remove(&mut self, id: NodeId) -> DependencyList {
        let Some(mut node) = self.nodes.remove(&id) else {
            return DependencyList::new();
        };
        if let Some(query) = node.query() {
            tracing::trace!(query = %query, "collecting subscription node");
            self.by_query.remove(query);
            if let Some(ids) = self.by_query_id.get_mut(query.id()) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_query_id.remove(query.id());
                }
            }
        }
        let deps = node.replace_dependencies(DependencyList::new());
        for dep in &deps {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.remove_dependent(id);
            }
        }
        // Nothing should still read a node with no references, but never
        // leave dangling edges behind.
        for dependent in node.dependents().clone() {
            if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
                let kept: DependencyList = dependent_node
                    .dependencies()
                    .iter()
                    .copied()
                    .filter(|d| *d != id)
                    .collect();
                dependent_node.replace_dependencies(kept);
                dependent_node.mark_dirty();
            }
        }
        deps
    }

    /// Swap `id`'s dependency set for `deps`: new edges take a reference,
    /// dropped edges release one. Reads of nodes collected in the meantime
    /// are left out and the node is marked dirty so its next read redoes them.
    pub fn install_dependencies(&mut self, id: NodeId, deps: DependencyList) {
        let before = deps.len();
        let deps: DependencyList = deps
            .into_iter()
            .filter(|dep| self.nodes.contains_key(dep))
            .collect();
        let lost_reads = deps.len() != before;
        let new_set: HashSet<NodeId> = deps.iter().copied().collect();
        let old = match self.nodes.get_mut(&id) {
            Some(node) => node.replace_dependencies(deps.clone()),
            None => return,
        };
        let old_set: HashSet<NodeId> = old.iter().copied().collect();

        for dep in deps.iter().filter(|d| !old_set.contains(d)) {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.add_dependent(id);
                dep_node.retain();
            }
        }
        for dep in old.iter().filter(|d| !new_set.contains(d)) {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.remove_dependent(id);
            }
            self.release(*dep);
        }
        if lost_reads {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.mark_dirty();
            }
        }
    }

    /// `source` changed: direct dependents become `Dirty`, everything
    /// downstream of them `MaybeDirty`. Returns how many nodes were marked.
    ///
    /// With `skip_computing`, nodes whose compute function is on the stack
    /// (and so is reading `source` right now) are left alone along with
    /// everything behind them.
    pub fn invalidate(&mut self, source: NodeId, skip_computing: bool) -> usize {
        let direct: Vec<NodeId> = match self.nodes.get(&source) {
            Some(node) => node.dependents().iter().copied().collect(),
            None => return 0,
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for id in direct {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if skip_computing && node.is_computing() {
                continue;
            }
            node.mark_dirty();
            visited.insert(id);
            queue.extend(node.dependents().iter().copied());
        }

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if skip_computing && node.is_computing() {
                continue;
            }
            node.mark_maybe_dirty();
            queue.extend(node.dependents().iter().copied());
        }

        tracing::trace!(marked = visited.len(), "propagated invalidation");
        visited.len()
    }

    /// Mark `id` itself dirty and everything downstream maybe-dirty.
    pub fn invalidate_node(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.mark_dirty();
        }
        let downstream: Vec<NodeId> = self
            .nodes
            .get(&id)
            .map(|node| node.dependents().iter().copied().collect())
            .unwrap_or_default();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = downstream.into();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.mark_maybe_dirty();
                queue.extend(node.dependents().iter().copied());
            }
        }
    }

    pub fn push_notification(&mut self, notification: Notification) {
        self.pending.push(notification);
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::DirtyState;
    use smallvec::smallvec;

    /// root -> a -> b, every node clean.
    fn chain() -> (NodeTable, NodeId, NodeId) {
        let mut table = NodeTable::new();
        let root = table.root();
        let a = table.get_or_create(&Query::new("a"));
        let b = table.get_or_create(&Query::new("b"));
        table.retain(b);
        table.install_dependencies(a, smallvec![root]);
        table.install_dependencies(b, smallvec![a]);
        table.get_mut(a).unwrap().mark_clean();
        table.get_mut(b).unwrap().mark_clean();
        (table, a, b)
    }

    #[test]
    fn get_or_create_memoizes_by_query() {
        let mut table = NodeTable::new();
        let first = table.get_or_create(&Query::new("item").with("a"));
        let again = table.get_or_create(&Query::new("item").with("a"));
        let other = table.get_or_create(&Query::new("item").with("b"));
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn edges_hold_references() {
        let (table, a, b) = chain();
        assert_eq!(table.get(a).unwrap().refs(), 1);
        assert!(table.get(a).unwrap().dependents().contains(&b));
        assert!(table.get(table.root()).unwrap().dependents().contains(&a));
    }

    #[test]
    fn invalidate_marks_direct_dirty_and_transitive_maybe_dirty() {
        let (mut table, a, b) = chain();
        let marked = table.invalidate(table.root(), false);

        assert_eq!(marked, 2);
        assert_eq!(table.get(a).unwrap().dirty_state(), DirtyState::Dirty);
        assert_eq!(table.get(b).unwrap().dirty_state(), DirtyState::MaybeDirty);
    }

    #[test]
    fn invalidate_can_skip_computing_nodes() {
        let (mut table, a, b) = chain();
        table.get_mut(b).unwrap().set_computing(true);

        table.invalidate(a, true);
        assert_eq!(table.get(b).unwrap().dirty_state(), DirtyState::Clean);

        table.invalidate(a, false);
        assert_eq!(table.get(b).unwrap().dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn releasing_last_handle_collects_the_chain() {
        let (mut table, a, b) = chain();
        table.release(b);

        assert!(table.get(b).is_none());
        assert!(table.get(a).is_none());
        assert_eq!(table.len(), 0);
        assert!(table.get(table.root()).unwrap().dependents().is_empty());
        assert!(table.lookup(&Query::new("a")).is_none());
    }

    #[test]
    fn shared_dependency_survives_one_consumer() {
        let (mut table, a, b) = chain();
        let c = table.get_or_create(&Query::new("c"));
        table.retain(c);
        table.install_dependencies(c, smallvec![a]);
        assert_eq!(table.get(a).unwrap().refs(), 2);

        table.release(b);
        assert!(table.get(b).is_none());
        assert!(table.get(a).is_some());
        assert_eq!(table.get(a).unwrap().refs(), 1);
    }

    #[test]
    fn reinstalling_dependencies_releases_dropped_edges() {
        let (mut table, a, b) = chain();
        let root = table.root();
        table.install_dependencies(b, smallvec![root]);

        assert!(table.get(a).is_none());
        assert!(table.get(root).unwrap().dependents().contains(&b));
    }

    #[test]
    fn sweep_collects_unreferenced_nodes_only() {
        let (mut table, _a, b) = chain();
        let orphan = table.get_or_create(&Query::new("orphan"));

        table.sweep(&[orphan, b]);
        assert!(table.get(orphan).is_none());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn ids_for_follows_creation_and_collection() {
        let mut table = NodeTable::new();
        let a = table.get_or_create(&Query::new("item").with("a"));
        let b = table.get_or_create(&Query::new("item").with("b"));
        table.retain(a);
        table.retain(b);
        table.get_or_create(&Query::new("other"));

        let mut ids = table.ids_for("item");
        ids.sort();
        assert_eq!(ids, vec![a, b]);

        table.release(a);
        assert_eq!(table.ids_for("item"), vec![b]);
        table.release(b);
        assert!(table.ids_for("item").is_empty());
    }

    #[test]
    fn collected_reads_are_not_installed() {
        let (mut table, a, b) = chain();
        let root = table.root();
        let gone = table.get_or_create(&Query::new("gone"));
        table.sweep(&[gone]);

        table.install_dependencies(b, smallvec![root, gone]);

        let node = table.get(b).unwrap();
        assert_eq!(node.dependencies(), &[root]);
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
        assert!(table.get(a).is_none());
    }

    #[test]
    fn invalidate_node_marks_itself_and_downstream() {
        let (mut table, a, b) = chain();
        table.invalidate_node(a);
        assert_eq!(table.get(a).unwrap().dirty_state(), DirtyState::Dirty);
        assert_eq!(table.get(b).unwrap().dirty_state(), DirtyState::MaybeDirty);
    }
}
