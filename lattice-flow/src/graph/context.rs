//! Tracking Context
//!
//! The tracking context records which nodes a computation reads. This is
//! what makes dependency edges implicit: compute functions never declare
//! their inputs, they just read them.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames, one per compute function currently
//! running on this thread. Entering a computation pushes a frame; every read
//! appends to the top frame; finishing pops it and hands back what was read.
//!
//! The stack doubles as the cycle detector: a node that is asked to compute
//! while it already has a frame on the stack reads itself.

use std::cell::RefCell;

use super::node::{DependencyList, NodeId};

thread_local! {
    static TRACKING_STACK: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

#[derive(Debug)]
struct Frame {
    node: NodeId,
    label: String,
    /// Distinct nodes read so far, in first-read order.
    reads: DependencyList,
}

/// Guard for one computation's frame. Pops the frame when dropped so the
/// stack stays balanced even if the computation panics.
pub(crate) struct TrackingScope {
    node: NodeId,
    finished: bool,
}

impl TrackingScope {
    pub fn enter(node: NodeId, label: String) -> Self {
        TRACKING_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                node,
                label,
                reads: DependencyList::new(),
            });
        });
        Self {
            node,
            finished: false,
        }
    }

    /// Pop this scope's frame and return the nodes it read.
    pub fn finish(mut self) -> DependencyList {
        self.finished = true;
        let frame = TRACKING_STACK.with(|stack| stack.borrow_mut().pop());
        match frame {
            Some(frame) => {
                debug_assert_eq!(frame.node, self.node, "tracking scope mismatch");
                frame.reads
            }
            None => DependencyList::new(),
        }
    }

    /// Whether any computation is running on this thread.
    pub fn is_active() -> bool {
        TRACKING_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Record a read of `node` in the innermost computation.
    pub fn track(node: NodeId) {
        TRACKING_STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                if !frame.reads.contains(&node) {
                    frame.reads.push(node);
                }
            }
        });
    }

    /// Whether `node` is being computed somewhere up the stack.
    pub fn contains(node: NodeId) -> bool {
        TRACKING_STACK.with(|stack| stack.borrow().iter().any(|f| f.node == node))
    }

    /// Labels from the outermost frame for `node` to the top of the stack,
    /// closed with `node`'s own label.
    pub fn cycle_path(node: NodeId) -> Vec<String> {
        TRACKING_STACK.with(|stack| {
            let stack = stack.borrow();
            let Some(start) = stack.iter().position(|f| f.node == node) else {
                return Vec::new();
            };
            let mut path: Vec<String> = stack[start..].iter().map(|f| f.label.clone()).collect();
            path.push(stack[start].label.clone());
            path
        })
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        TRACKING_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(frame) = popped {
                debug_assert_eq!(frame.node, self.node, "tracking scope mismatch");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_collects_distinct_reads_in_order() {
        let node = NodeId::new();
        let a = NodeId::new();
        let b = NodeId::new();

        let scope = TrackingScope::enter(node, "[n]".into());
        assert!(TrackingScope::is_active());

        TrackingScope::track(b);
        TrackingScope::track(a);
        TrackingScope::track(b);

        let reads = scope.finish();
        assert_eq!(reads.as_slice(), &[b, a]);
        assert!(!TrackingScope::is_active());
    }

    #[test]
    fn nested_scopes_track_separately() {
        let outer = NodeId::new();
        let inner = NodeId::new();
        let x = NodeId::new();
        let y = NodeId::new();

        let outer_scope = TrackingScope::enter(outer, "[outer]".into());
        TrackingScope::track(x);
        {
            let inner_scope = TrackingScope::enter(inner, "[inner]".into());
            TrackingScope::track(y);
            assert!(TrackingScope::contains(outer));
            assert!(TrackingScope::contains(inner));
            assert_eq!(inner_scope.finish().as_slice(), &[y]);
        }
        assert!(!TrackingScope::contains(inner));
        assert_eq!(outer_scope.finish().as_slice(), &[x]);
    }

    #[test]
    fn dropped_scope_pops_its_frame() {
        let node = NodeId::new();
        {
            let _scope = TrackingScope::enter(node, "[n]".into());
            assert!(TrackingScope::contains(node));
        }
        assert!(!TrackingScope::is_active());
    }

    #[test]
    fn cycle_path_starts_at_the_repeated_node() {
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();

        let _sa = TrackingScope::enter(a, "[a]".into());
        let _sb = TrackingScope::enter(b, "[b]".into());
        let _sc = TrackingScope::enter(c, "[c]".into());

        assert_eq!(TrackingScope::cycle_path(b), vec!["[b]", "[c]", "[b]"]);
        assert!(TrackingScope::cycle_path(NodeId::new()).is_empty());
    }
}
