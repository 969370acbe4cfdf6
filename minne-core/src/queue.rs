//! Bounded multi-producer multi-consumer queue.
//!
//! Fixed-capacity ring buffer with explicit backpressure: a push into a full
//! queue hands the item straight back instead of blocking or growing, so the
//! producer decides whether to drain, drop, or retry.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Queue construction errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid capacity (must be greater than zero)")]
    InvalidCapacity,
}

/// Item rejected by [`BoundedQueue::try_push`].
#[derive(PartialEq, Eq)]
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<T> fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Queue capacity exceeded")
    }
}

impl<T> std::error::Error for QueueFull<T> {}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    capacity: usize,
}

/// Shared handle to a bounded queue. Clone with [`share`](Self::share).
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> BoundedQueue<T> {
    pub fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::InvalidCapacity);
        }
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                capacity,
            }),
        })
    }

    /// Creates new handle to the same queue.
    #[inline]
    pub fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Appends `item`, or returns it when the queue is full or closed.
    pub fn try_push(&self, item: T) -> Result<(), QueueFull<T>> {
        let mut state = self.inner.state.lock();
        if state.closed || state.items.len() >= self.inner.capacity {
            return Err(QueueFull(item));
        }
        state.items.push_back(item);
        drop(state);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Returns `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.state.lock().items.pop_front()
    }

    /// Waits up to `timeout` for an item.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self
                .inner
                .not_empty
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.items.pop_front();
            }
        }
    }

    /// Blocks until an item arrives. Returns `None` once the queue is closed
    /// and empty.
    pub fn pop_wait(&self) -> Option<T> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.inner.not_empty.wait(&mut state);
        }
    }

    /// Removes and returns every queued item in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        self.inner.state.lock().items.drain(..).collect()
    }

    /// Rejects further pushes and wakes every waiting consumer. Items already
    /// queued can still be popped.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
