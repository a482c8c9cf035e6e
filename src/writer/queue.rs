//! # Bounded Work Queue
//!
//! A small MPMC FIFO connecting the creator's producer thread to the
//! compression workers and the writer thread.
//!
//! - `push` blocks while the queue is at its soft capacity — this is the
//!   creator's backpressure: closing a cluster stalls `add_item` until a
//!   worker frees a slot;
//! - `pop` blocks while the queue is empty;
//! - `close` wakes everyone; `pop` keeps draining remaining items and then
//!   returns `None`.
//!
//! Built on `parking_lot::{Mutex, Condvar}` with one condvar per wait
//! direction.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Appends an item, blocking while the queue is at capacity.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        while state.items.len() >= state.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        debug_assert!(!state.closed, "push after close");
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Removes the oldest item, blocking while the queue is empty. Returns
    /// `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Marks the queue closed and wakes all waiters.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
