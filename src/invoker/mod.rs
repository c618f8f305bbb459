//! Invoker caches (C2) — memoize the type-erased-to-concrete call path
//! for each message type so repeated dispatch never re-derives it.
//!
//! Generic monomorphization already makes a single `dispatcher.send::<Ping>`
//! call site zero-cost — the compiler knows `Ping`'s concrete handler trait
//! at compile time. What still varies at runtime is *which instance* the
//! locator hands back behind `Arc<dyn Any + Send + Sync>`, and composing a
//! pipeline around it pulls several `Vec`s out of the locator on every call.
//! [`InvokerCache`] memoizes that composition step behind a single
//! process-wide, write-once-per-key entry. Request, void-request, and
//! stream-request dispatch each get their own cache because their result
//! shape differs.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// A process-wide, append-only cache keyed by concrete message type.
///
/// `V` is whatever the dispatch table wants memoized per message type — for
/// this crate, an `Arc<dyn Any + Send + Sync>` holding a boxed invoker
/// closure, downcast back to its concrete closure type at the call site.
/// Insertion is idempotent: if two dispatches race to build the same entry,
/// both builds run but only one wins the slot, and every caller observes a
/// successfully-built value either way.
pub struct InvokerCache<V> {
    entries: DashMap<TypeId, V>,
    builds: AtomicUsize,
}

impl<V: Clone> InvokerCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            builds: AtomicUsize::new(0),
        }
    }

    /// Returns the cached entry for `M`, building and inserting it via
    /// `build` on a cache miss. Concurrent misses for the same `M` may both
    /// run `build`; the cache keeps whichever insert lands first (`DashMap`
    /// gives lock-free reads and per-shard write locking, not a single
    /// global build lock — duplicate builds are benign since invokers are
    /// pure functions of a message's static type).
    pub fn get_or_build<M: 'static>(&self, build: impl FnOnce() -> V) -> V {
        let key = TypeId::of::<M>();
        if let Some(existing) = self.entries.get(&key) {
            return existing.clone();
        }
        let value = build();
        self.builds.fetch_add(1, Ordering::Relaxed);
        self.entries.entry(key).or_insert(value).clone()
    }

    /// Number of times `build` has actually run. Exposed for tests verifying
    /// that repeated dispatch hits the cache rather than rebuilding.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

impl<V: Clone> Default for InvokerCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased invoker payload, boxed once per concrete message type and
/// downcast back to its concrete closure type at the dispatch call site.
pub type ErasedInvoker = Arc<dyn Any + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;
    struct Pong;

    #[test]
    fn builds_once_then_reuses_cached_value() {
        let cache: InvokerCache<Arc<str>> = InvokerCache::new();

        let first = cache.get_or_build::<Ping>(|| Arc::from("built"));
        let second = cache.get_or_build::<Ping>(|| panic!("should not rebuild"));

        assert_eq!(&*first, "built");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.build_count(), 1);
    }

    #[test]
    fn distinct_message_types_get_distinct_entries() {
        let cache: InvokerCache<&'static str> = InvokerCache::new();

        let ping = cache.get_or_build::<Ping>(|| "ping-invoker");
        let pong = cache.get_or_build::<Pong>(|| "pong-invoker");

        assert_eq!(ping, "ping-invoker");
        assert_eq!(pong, "pong-invoker");
        assert_eq!(cache.build_count(), 2);
    }
}
