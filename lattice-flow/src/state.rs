//! State Cell
//!
//! The single slot holding the canonical application state.
//!
//! The value itself is immutable: a write swaps in a new `Arc<Value>` and
//! bumps the version, so a reader either sees the old snapshot or the new
//! one, never a partial write. The only write path is [`StateCell::replace`],
//! which is crate-private and reached exclusively through the reserved `db`
//! effect.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// An immutable view of the state at one version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub value: Arc<Value>,
    pub version: u64,
}

#[derive(Debug)]
pub struct StateCell {
    current: RwLock<Snapshot>,
}

impl StateCell {
    pub fn new(initial: Value) -> Self {
        Self {
            current: RwLock::new(Snapshot {
                value: Arc::new(initial),
                version: 0,
            }),
        }
    }

    /// The current value and its version, read atomically.
    pub fn snapshot(&self) -> Snapshot {
        self.current.read().clone()
    }

    pub fn value(&self) -> Arc<Value> {
        Arc::clone(&self.current.read().value)
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Swap in a new value. Returns the new version.
    pub(crate) fn replace(&self, value: Value) -> u64 {
        let mut current = self.current.write();
        current.value = Arc::new(value);
        current.version += 1;
        current.version
    }

    /// Restore the cell to a fresh value at version zero.
    pub(crate) fn reset(&self, value: Value) {
        *self.current.write() = Snapshot {
            value: Arc::new(value),
            version: 0,
        };
    }
}
