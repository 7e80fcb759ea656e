//! Change watchers attached to subscription nodes.
//!
//! A watcher is the rendering layer's hook: its callback receives the new
//! value each time the node it watches recomputes to something different.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

pub type WatchFn = dyn Fn(&Value) + Send + Sync;

/// Unique identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    /// Uses an atomic counter so ids are unique across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WatchId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub(crate) struct Watcher {
    id: WatchId,
    notify: Arc<WatchFn>,
}

impl Watcher {
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self {
            id: WatchId::new(),
            notify: Arc::new(notify),
        }
    }

    pub fn id(&self) -> WatchId {
        self.id
    }

    pub fn callback(&self) -> Arc<WatchFn> {
        Arc::clone(&self.notify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn watch_ids_are_unique() {
        let a = WatchId::new();
        let b = WatchId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn callback_receives_value() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let watcher = Watcher::new(move |value| {
            seen_clone.store(value.as_u64().unwrap_or(0) as usize, Ordering::SeqCst);
        });

        (watcher.callback())(&Value::from(9));
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }
}
