//! Event Queue
//!
//! Two FIFO queues behind one lock:
//!
//! - `ready`: events to process now. Whoever pushes onto an idle queue
//!   becomes the drainer and processes events until it is empty; anyone
//!   pushing while a drain is running (re-entrantly from an effect, or from
//!   another thread) just enqueues behind it.
//! - `deferred`: events dispatched "later". A tick moves them to `ready`.
//!
//! The `draining` flag is only ever flipped while holding the lock, so an
//! event pushed just as the drainer finds the queue empty is never stranded.
//! The drain is owned through a [`DrainClaim`], which gives it up if the
//! drainer unwinds.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event::Event;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Event>,
    deferred: VecDeque<Event>,
    draining: bool,
}

#[derive(Default)]
pub(crate) struct EventQueue {
    state: Mutex<QueueState>,
    deferred_ready: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue for immediate processing. Returns the claim when the caller
    /// must drain.
    pub fn push(&self, event: Event) -> Option<DrainClaim<'_>> {
        let mut state = self.state.lock();
        state.ready.push_back(event);
        self.claim(&mut state)
    }

    /// Enqueue for the next tick and wake the event loop.
    pub fn push_later(&self, event: Event) {
        self.state.lock().deferred.push_back(event);
        self.deferred_ready.notify_one();
    }

    /// Move up to `max` deferred events behind the ready ones. Returns the
    /// claim when the caller must drain.
    pub fn promote(&self, max: Option<usize>) -> Option<DrainClaim<'_>> {
        let mut state = self.state.lock();
        let count = max.map_or(state.deferred.len(), |max| max.min(state.deferred.len()));
        let moved: Vec<Event> = state.deferred.drain(..count).collect();
        state.ready.extend(moved);
        if !state.deferred.is_empty() {
            self.deferred_ready.notify_one();
        }
        if state.ready.is_empty() {
            return None;
        }
        self.claim(&mut state)
    }

    fn claim(&self, state: &mut QueueState) -> Option<DrainClaim<'_>> {
        if state.draining {
            None
        } else {
            state.draining = true;
            Some(DrainClaim {
                queue: self,
                released: false,
            })
        }
    }

    /// Next event for the drainer. Releases the drain when empty.
    fn next(&self) -> Option<Event> {
        let mut state = self.state.lock();
        let event = state.ready.pop_front();
        if event.is_none() {
            state.draining = false;
        }
        event
    }

    /// Drop every ready event. Deferred events are kept.
    pub fn purge(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.ready.len();
        state.ready.clear();
        dropped
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.ready.clear();
        state.deferred.clear();
    }

    /// `(ready, deferred)` queue lengths.
    pub fn pending(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.ready.len(), state.deferred.len())
    }

    /// Resolves once deferred events may be waiting.
    pub async fn deferred_ready(&self) {
        self.deferred_ready.notified().await;
    }
}

/// Exclusive right to drain the ready queue.
pub(crate) struct DrainClaim<'a> {
    queue: &'a EventQueue,
    released: bool,
}

impl DrainClaim<'_> {
    /// Next event to process. `None` once the queue is empty, at which point
    /// the drain has been handed back.
    pub fn next(&mut self) -> Option<Event> {
        if self.released {
            return None;
        }
        let event = self.queue.next();
        if event.is_none() {
            self.released = true;
        }
        event
    }
}

impl Drop for DrainClaim<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut state = self.queue.state.lock();
        state.draining = false;
        if !state.ready.is_empty() {
            tracing::warn!(
                pending = state.ready.len(),
                "drain abandoned, events wait for the next dispatch"
            );
        }
    }
}
