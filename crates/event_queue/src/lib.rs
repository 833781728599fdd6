//! Blocking FIFO handoff from the render thread to the controlling thread.
//!
//! Input events (keystrokes, clicks) are observed on the render thread but
//! consumed by the embedding application. The consumer may be holding a
//! cooperating external lock that the render thread also needs, so the
//! blocking pop releases that lock for the duration of the wait.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use surface_protocol::CooperatingLock;

struct QueueState<T> {
    entries: VecDeque<T>,
    /// True while a consumer is parked on `ready`; lets `push` skip the
    /// notify when nobody is waiting.
    waiting: bool,
}

pub struct EventQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                waiting: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|_| panic!("event queue lock poisoned"))
    }

    /// Append a value at the tail. Never blocks; wakes at most one waiting
    /// consumer.
    pub fn push(&self, value: T) {
        let mut state = self.lock_state();
        state.entries.push_back(value);
        if state.waiting {
            self.ready.notify_one();
        }
    }

    /// Remove and return the oldest value, blocking until one is available.
    ///
    /// The fast path (queue non-empty) never touches `external`. When the
    /// queue is empty, `external` is released for the duration of the wait
    /// and re-acquired after the internal lock has been dropped, so the two
    /// locks are never held across each other.
    pub fn pop(&self, external: &dyn CooperatingLock) -> T {
        {
            let mut state = self.lock_state();
            if let Some(value) = state.entries.pop_front() {
                return value;
            }
        }

        external.release();
        let value = {
            let mut state = self.lock_state();
            while state.entries.is_empty() {
                state.waiting = true;
                state = self
                    .ready
                    .wait(state)
                    .unwrap_or_else(|_| panic!("event queue lock poisoned"));
            }
            state.waiting = false;
            state
                .entries
                .pop_front()
                .unwrap_or_else(|| panic!("event queue woke empty"))
        };
        external.acquire();
        value
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().entries.is_empty()
    }

    pub fn clear(&self) {
        self.lock_state().entries.clear();
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
