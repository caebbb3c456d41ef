//! Submission queue shared by the pool's workers.
//!
//! One mutex-guarded deque serves all three disciplines of [`QueueKind`]. In
//! direct hand-off mode an offer only succeeds while an idle taker is waiting
//! for it, so the queue never holds more items than waiting workers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use clotho_core::QueueKind;
use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    /// Workers blocked in `poll`
    idle_takers: usize,
    closed: bool,
}

impl<T> QueueState<T> {
    fn has_room(&self, kind: QueueKind) -> bool {
        match kind {
            QueueKind::DirectHandoff => self.idle_takers > self.items.len(),
            QueueKind::Bounded(capacity) => self.items.len() < capacity,
            QueueKind::Unbounded => true,
        }
    }
}

/// Blocking work queue with hand-off, bounded and unbounded disciplines.
pub(crate) struct WorkQueue<T> {
    kind: QueueKind,
    state: Mutex<QueueState<T>>,
    /// Signalled when an item arrives or the queue closes
    item_ready: Condvar,
    /// Signalled when a taker starts waiting or the queue closes
    taker_ready: Condvar,
}

impl<T> WorkQueue<T> {
    pub(crate) fn new(kind: QueueKind) -> Self {
        let initial = match kind {
            QueueKind::Bounded(capacity) => capacity.min(1024),
            _ => 0,
        };
        Self {
            kind,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(initial),
                idle_takers: 0,
                closed: false,
            }),
            item_ready: Condvar::new(),
            taker_ready: Condvar::new(),
        }
    }

    pub(crate) fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Enqueue without blocking; hands the item back when there is no room.
    pub(crate) fn offer(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed || !state.has_room(self.kind) {
            return Err(item);
        }
        state.items.push_back(item);
        self.item_ready.notify_one();
        Ok(())
    }

    /// Enqueue, waiting up to `timeout` for room.
    pub(crate) fn offer_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(item);
            }
            if state.has_room(self.kind) {
                state.items.push_back(item);
                self.item_ready.notify_one();
                return Ok(());
            }
            if self.taker_ready.wait_until(&mut state, deadline).timed_out() {
                if !state.closed && state.has_room(self.kind) {
                    state.items.push_back(item);
                    self.item_ready.notify_one();
                    return Ok(());
                }
                return Err(item);
            }
        }
    }

    /// Dequeue, waiting up to `timeout` (forever when `None`).
    ///
    /// Returns `None` on timeout, or once the queue is closed and empty.
    pub(crate) fn poll(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        if let Some(item) = state.items.pop_front() {
            return Some(item);
        }
        if state.closed {
            return None;
        }

        state.idle_takers += 1;
        self.taker_ready.notify_one();
        let item = loop {
            if let Some(item) = state.items.pop_front() {
                break Some(item);
            }
            if state.closed {
                break None;
            }
            match deadline {
                Some(deadline) => {
                    if self.item_ready.wait_until(&mut state, deadline).timed_out() {
                        // an offer may have raced with the timeout
                        break state.items.pop_front();
                    }
                }
                None => self.item_ready.wait(&mut state),
            }
        };
        state.idle_takers -= 1;
        item
    }

    /// Stop accepting items and wake every waiter. Queued items remain takeable.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.item_ready.notify_all();
        self.taker_ready.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Remove and return every queued item.
    pub(crate) fn drain(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }

    /// Remove the first item matching `pred`.
    pub(crate) fn remove_where(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        let mut state = self.state.lock();
        let index = state.items.iter().position(pred)?;
        let item = state.items.remove(index);
        self.taker_ready.notify_all();
        item
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}
