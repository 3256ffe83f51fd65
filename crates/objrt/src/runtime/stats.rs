//! Dispatch statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, bumped with relaxed atomics on the dispatch paths.
#[derive(Debug, Default)]
pub(crate) struct RuntimeStats {
    method_list_scans: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_fills: AtomicU64,
    cache_growths: AtomicU64,
    cache_flushes: AtomicU64,
    resolver_calls: AtomicU64,
    forward_fallbacks: AtomicU64,
}

/// A point-in-time copy of the runtime's dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Slow-path walks over method lists.
    pub method_list_scans: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Entries written into a method cache, forwarding entries included.
    pub cache_fills: u64,
    /// Cache table reallocations.
    pub cache_growths: u64,
    pub cache_flushes: u64,
    pub resolver_calls: u64,
    /// Lookups that ended in the forwarding sentinel.
    pub forward_fallbacks: u64,
}

macro_rules! counters {
    ($($bump:ident => $field:ident),* $(,)?) => {
        impl RuntimeStats {
            $(
                #[inline]
                pub(crate) fn $bump(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub(crate) fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    scan => method_list_scans,
    hit => cache_hits,
    miss => cache_misses,
    fill => cache_fills,
    grow => cache_growths,
    flush => cache_flushes,
    resolve => resolver_calls,
    forward => forward_fallbacks,
}
