//! Bounded drop-oldest tick queue
//!
//! The producer must never block and memory must never grow unboundedly,
//! so under load the oldest ticks are sacrificed: indicator correctness
//! depends only on the sequence of ticks actually consumed, not on
//! wall-clock completeness. One lock, minimal critical sections.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

use super::Tick;

pub struct TickQueue {
    inner: Mutex<VecDeque<Tick>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl TickQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Producer side: push a tick, dropping the oldest when full
    pub fn push(&self, tick: Tick) {
        {
            let mut q = self.inner.lock();
            if q.len() == self.capacity {
                q.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(tick);
        }
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<Tick> {
        self.inner.lock().pop_front()
    }

    /// Consumer side: wait for the next tick
    pub async fn pop(&self) -> Tick {
        loop {
            if let Some(tick) = self.try_pop() {
                return tick;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Ticks sacrificed to the drop-oldest discipline so far
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
