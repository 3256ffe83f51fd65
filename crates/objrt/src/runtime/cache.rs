//! Per-class method cache.
//!
//! Each class owns a [`MethodCache`]: a power-of-two, open-addressed table
//! from selector to implementation. Lookups are lock-free; mutation happens
//! under the class's cache lock.
//!
//! # Reader safety
//!
//! A reader may search a table while a writer is inserting into it or has just
//! replaced it. This is safe because:
//!
//! - a bucket's key is written once and never changed afterwards
//! - an entry's implementation is stored before its key, and the key store
//!   has release ordering that the reader's acquire load pairs with
//! - growth builds a complete new table and publishes it with one
//!   [`ArcSwap`] store
//! - a reader holds the table it loaded until its search ends, so a table
//!   that has been swapped out is freed when its last reader lets go
//!
//! Reclamation is per table: a reader searching one class never delays freeing
//! the old tables of another.
//!
//! A table never becomes full (it grows past three quarters occupancy), so
//! every linear scan reaches either the key or an empty bucket.

use std::collections::TryReserveError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use fxhash::FxBuildHasher;
use hashbrown::HashSet;
use parking_lot::Mutex;

use super::method::Imp;
use super::selector::Selector;
use crate::config::MIN_CACHE_CAPACITY;
use crate::error::fatal;

/// Key of an empty bucket. Selector keys are addresses, never zero.
const EMPTY_KEY: usize = 0;

pub(crate) struct Bucket {
    key: AtomicUsize,
    imp: AtomicUsize,
}

pub(crate) struct CacheTable {
    buckets: Vec<Bucket>,
    occupied: AtomicUsize,
}

/// Shared table of every empty cache. Capacity zero; never written.
static EMPTY_TABLE: LazyLock<Arc<CacheTable>> = LazyLock::new(|| {
    Arc::new(CacheTable {
        buckets: Vec::new(),
        occupied: AtomicUsize::new(0),
    })
});

impl CacheTable {
    fn try_with_capacity(capacity: usize) -> Result<CacheTable, TryReserveError> {
        debug_assert!(capacity.is_power_of_two());

        let mut buckets = Vec::new();
        buckets.try_reserve_exact(capacity)?;
        buckets.resize_with(capacity, || Bucket {
            key: AtomicUsize::new(EMPTY_KEY),
            imp: AtomicUsize::new(0),
        });

        Ok(CacheTable {
            buckets,
            occupied: AtomicUsize::new(0),
        })
    }

    pub(crate) fn with_capacity(capacity: usize) -> CacheTable {
        Self::try_with_capacity(capacity).unwrap_or_else(|e| {
            fatal(format_args!("method cache of {capacity} entries: {e}"))
        })
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn start(&self, sel: Selector) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        let hash = sel.hash_code() as usize;
        hash & (self.capacity() - 1)
    }

    fn find(&self, sel: Selector) -> Option<Imp> {
        if self.buckets.is_empty() {
            return None;
        }

        let key = sel.key();
        let mask = self.capacity() - 1;
        let mut i = self.start(sel);

        for _ in 0..self.capacity() {
            let bucket = &self.buckets[i];
            let k = bucket.key.load(Ordering::Acquire);
            if k == key {
                // SAFETY: the imp was stored (from Imp::addr) before the key
                // was published.
                return Some(unsafe { Imp::from_addr(bucket.imp.load(Ordering::Acquire)) });
            }
            if k == EMPTY_KEY {
                return None;
            }
            i = (i + 1) & mask;
        }

        None
    }

    /// Writes `sel → imp`. The caller holds the cache lock and has made sure
    /// the table has room.
    fn store(&self, sel: Selector, imp: Imp) {
        let key = sel.key();
        let mask = self.capacity() - 1;
        let mut i = self.start(sel);

        loop {
            let bucket = &self.buckets[i];
            let k = bucket.key.load(Ordering::Relaxed);
            if k == key {
                bucket.imp.store(imp.addr(), Ordering::Release);
                return;
            }
            if k == EMPTY_KEY {
                bucket.imp.store(imp.addr(), Ordering::Relaxed);
                bucket.key.store(key, Ordering::Release);
                self.occupied.fetch_add(1, Ordering::Relaxed);
                return;
            }
            i = (i + 1) & mask;
        }
    }

    fn entries(&self) -> impl Iterator<Item = (Selector, Imp)> + '_ {
        self.buckets.iter().filter_map(|bucket| {
            let key = bucket.key.load(Ordering::Acquire);
            (key != EMPTY_KEY).then(|| {
                // SAFETY: non-empty keys are selector keys and their imps were
                // published before them.
                unsafe {
                    (
                        Selector::from_key(key),
                        Imp::from_addr(bucket.imp.load(Ordering::Acquire)),
                    )
                }
            })
        })
    }
}

/// What [`MethodCache::insert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insert {
    /// The selector was already cached; its implementation was replaced.
    Overwrote,
    Inserted,
    /// The table was reallocated before inserting. Holds the capacity of
    /// the table that was swapped out.
    Grew { retired: usize },
}

/// A class's method cache.
pub(crate) struct MethodCache {
    table: ArcSwap<CacheTable>,
    lock: Mutex<()>,
    /// Selectors the resolver hooks already declined for this class. Only
    /// consulted while nothing can be cached, before `initialize` finishes.
    declined: Mutex<HashSet<Selector, FxBuildHasher>>,
}

impl MethodCache {
    pub(crate) fn new() -> Self {
        MethodCache {
            table: ArcSwap::new(Arc::clone(&*EMPTY_TABLE)),
            lock: Mutex::new(()),
            declined: Mutex::new(HashSet::with_hasher(FxBuildHasher::default())),
        }
    }

    /// Lock-free search. Never blocks, even while the cache lock is held.
    #[inline]
    pub(crate) fn find(&self, sel: Selector) -> Option<Imp> {
        self.table.load().find(sel)
    }

    /// Caches `sel → imp`, growing the table first if the new occupancy
    /// would pass three quarters of capacity.
    pub(crate) fn insert(&self, sel: Selector, imp: Imp, initial_capacity: usize) -> Insert {
        let _guard = self.lock.lock();
        let table = self.table.load_full();

        if table.find(sel).is_some() {
            table.store(sel, imp);
            return Insert::Overwrote;
        }

        let occupied = table.occupied.load(Ordering::Relaxed) + 1;
        if occupied <= table.capacity() / 4 * 3 {
            table.store(sel, imp);
            return Insert::Inserted;
        }

        let capacity = if table.capacity() == 0 {
            initial_capacity.max(MIN_CACHE_CAPACITY).next_power_of_two()
        } else {
            table.capacity() * 2
        };

        let grown = CacheTable::with_capacity(capacity);
        for (old_sel, old_imp) in table.entries() {
            grown.store(old_sel, old_imp);
        }
        grown.store(sel, imp);

        self.table.store(Arc::new(grown));
        Insert::Grew { retired: table.capacity() }
    }

    /// Empties the cache and forgets declined resolutions. Returns the
    /// capacity of the table that was swapped out, or `None` if the cache
    /// was already empty.
    pub(crate) fn flush(&self) -> Option<usize> {
        let _guard = self.lock.lock();
        self.declined.lock().clear();

        let capacity = self.table.load().capacity();
        if capacity == 0 {
            return None;
        }
        self.table.store(Arc::clone(&*EMPTY_TABLE));
        Some(capacity)
    }

    /// Records that the resolver hooks declined `sel`.
    pub(crate) fn decline(&self, sel: Selector) {
        self.declined.lock().insert(sel);
    }

    /// True if the resolver hooks already declined `sel` since the last
    /// flush.
    pub(crate) fn was_declined(&self, sel: Selector) -> bool {
        self.declined.lock().contains(&sel)
    }

    #[cfg(test)]
    pub(crate) fn occupied(&self) -> usize {
        let _guard = self.lock.lock();
        self.table.load().occupied.load(Ordering::Relaxed)
    }

    /// Lock-free read of the current capacity.
    pub(crate) fn capacity(&self) -> usize {
        self.table.load().capacity()
    }

    /// Lock-free snapshot. May miss an entry a writer is inserting.
    pub(crate) fn entries(&self) -> Vec<(Selector, Imp)> {
        self.table.load().entries().collect()
    }
}

impl Default for MethodCache {
    fn default() -> Self {
        Self::new()
    }
}
