//! In-memory priority queue keyed by entry.
//!
//! Entries are stored in a map keyed by [`QueueItem::key`] and the winner is
//! selected when popping. Ordering is therefore evaluated against whatever
//! state an entry observes at pop time (for plans: the live task state) rather
//! than a snapshot taken at push time.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::QueueItem;
use crate::core::Error;

/// Concurrent priority queue with optional blocking pop.
pub struct PriorityQueue<T> {
    entries: Mutex<HashMap<String, T>>,
    available: Notify,
    blocking: bool,
}

impl<T: QueueItem> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.entries.lock().len())
            .field("blocking", &self.blocking)
            .finish()
    }
}

impl<T: QueueItem> PriorityQueue<T> {
    /// Non-blocking queue: popping an empty queue fails with
    /// [`Error::NotFound`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: Notify::new(),
            blocking: false,
        }
    }

    /// Blocking queue: popping an empty queue waits for a push.
    #[must_use]
    pub fn blocking() -> Self {
        Self {
            blocking: true,
            ..Self::new()
        }
    }

    /// Whether [`PriorityQueue::pop`] waits on an empty queue.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Insert entries, replacing queued entries with the same key.
    pub fn push(&self, items: impl IntoIterator<Item = T>) {
        let mut pushed = false;
        {
            let mut entries = self.entries.lock();
            for item in items {
                entries.insert(item.key().to_owned(), item);
                pushed = true;
            }
        }
        if pushed {
            self.available.notify_waiters();
        }
    }

    /// Remove and return the first entry in dispatch order.
    ///
    /// A blocking queue waits while empty; a non-blocking one returns
    /// immediately. Selection is O(n) in the queue length.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when a non-blocking queue is empty.
    pub async fn pop(&self) -> Result<T, Error> {
        loop {
            // Registered before checking so a push in between is not missed.
            let notified = self.available.notified();
            if let Some(item) = self.take_first() {
                return Ok(item);
            }
            if !self.blocking {
                return Err(Error::NotFound("queue is empty".into()));
            }
            notified.await;
        }
    }

    /// Remove and return the first entry without ever waiting.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the queue is empty.
    pub fn try_pop(&self) -> Result<T, Error> {
        self.take_first()
            .ok_or_else(|| Error::NotFound("queue is empty".into()))
    }

    // Linear scan per pop: entries are ordered by live state, so no index
    // built at push time stays valid.
    fn take_first(&self) -> Option<T> {
        let mut entries = self.entries.lock();
        let key = entries
            .values()
            .min_by(|a, b| a.dispatch_order(b))
            .map(|item| item.key().to_owned())?;
        entries.remove(&key)
    }

    /// Remove the entry sharing `item`'s key. Returns whether one was queued.
    pub fn remove(&self, item: &T) -> bool {
        self.remove_key(item.key())
    }

    /// Remove the entry with `key`. Returns whether one was queued.
    pub fn remove_key(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Apply `item`'s priority to the queued entry with the same key.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no entry has that key.
    pub fn update(&self, item: &T) -> Result<(), Error> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(item.key())
            .ok_or_else(|| Error::NotFound(format!("queue key `{}`", item.key())))?;
        entry.set_priority(item.priority());
        Ok(())
    }

    /// Snapshot of queued entries in dispatch order.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        let mut items: Vec<T> = self.entries.lock().values().cloned().collect();
        items.sort_by(T::dispatch_order);
        items
    }

    /// Whether an entry with `key` is queued.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry and wake blocked pops so they re-check the queue.
    pub fn reset(&self) {
        self.entries.lock().clear();
        self.available.notify_waiters();
    }
}
