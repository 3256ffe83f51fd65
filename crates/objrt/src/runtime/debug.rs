//! Accessors that never block.
//!
//! Meant for debuggers and crash handlers, which may run while other
//! threads are stopped holding runtime locks. Cache reads are lock-free;
//! anything that needs a lock tries it once and reports
//! [`Error::WouldBlock`] instead of waiting.

use super::class::Class;
use super::method::Imp;
use super::selector::Selector;
use super::Runtime;
use crate::error::{Error, Result};

/// The cached implementation of `sel` in `class`, without filling, counting
/// or taking any lock.
#[must_use]
pub fn peek_cache(rt: &Runtime, class: Class, sel: Selector) -> Option<Imp> {
    rt.cached(class, sel)
}

/// Every entry currently in `class`'s cache, forwarding entries included.
#[must_use]
pub fn cache_entries(_rt: &Runtime, class: Class) -> Vec<(Selector, Imp)> {
    class.cache().entries()
}

/// Number of buckets in `class`'s cache; zero until the first fill.
#[must_use]
pub fn cache_capacity(_rt: &Runtime, class: Class) -> usize {
    class.cache().capacity()
}

/// Every realized class, sorted by name.
///
/// # Errors
///
/// [`Error::WouldBlock`] if the runtime lock is held exclusively.
pub fn try_realized_classes(rt: &Runtime) -> Result<Vec<Class>> {
    let state = rt.state.try_read().ok_or(Error::WouldBlock)?;
    let mut classes: Vec<Class> = state.classes.values().copied().collect();
    classes.sort_unstable_by_key(|c| c.name());
    Ok(classes)
}

/// The implementation `class` would use for `sel`, from the cache or the
/// method lists. `None` if nothing implements it or the cache holds the
/// forwarding entry. Never fills the cache, runs `initialize` or calls a
/// resolver.
///
/// # Errors
///
/// [`Error::WouldBlock`] if the cache misses and the runtime lock or a
/// class overlay is held exclusively.
pub fn try_method_lookup(rt: &Runtime, class: Class, sel: Selector) -> Result<Option<Imp>> {
    if let Some(imp) = peek_cache(rt, class, sel) {
        return Ok(Some(imp).filter(|imp| !imp.is_forward()));
    }

    let _state = rt.state.try_read().ok_or(Error::WouldBlock)?;
    for c in class.chain() {
        let rw = c.try_rw().ok_or(Error::WouldBlock)?;
        if let Some(method) = rw.find_method(sel) {
            return Ok(Some(method.imp()));
        }
    }
    Ok(None)
}
