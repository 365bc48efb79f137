//! Queue backends.

pub mod memory;

use std::cmp::Ordering;

pub use memory::PriorityQueue;

/// An entry that can live in a [`PriorityQueue`].
///
/// Entries are identified by [`QueueItem::key`]; pushing an entry whose key is
/// already queued replaces the old one.
pub trait QueueItem: Clone + Send + Sync + 'static {
    /// Deduplication key.
    fn key(&self) -> &str;

    /// Declared priority, lower values dispatch first.
    fn priority(&self) -> i64;

    /// Replace the declared priority.
    fn set_priority(&mut self, priority: i64);

    /// Dispatch order; `Less` pops first.
    ///
    /// The default orders by priority, then key. Implementations must keep the
    /// order total: only equal keys may compare `Equal`.
    fn dispatch_order(&self, other: &Self) -> Ordering {
        self.priority()
            .cmp(&other.priority())
            .then_with(|| self.key().cmp(other.key()))
    }
}
