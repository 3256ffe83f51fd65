//! Process-wide selector registry.
//!
//! Every method name is interned exactly once. The resulting [`Selector`] is
//! a reference to a registry entry that lives for the rest of the process,
//! so comparing two selectors is a pointer comparison and hashing one writes
//! a hash computed at interning time.
//!
//! # Sharding
//!
//! The registry is split into `NUM_SHARDS` independent shards, each a
//! `hashbrown` map behind a `parking_lot` read-write lock. The shard is
//! chosen from the low bits of the name's `FxHash`. Looking up a name that is
//! already interned only takes the shared side of one shard lock; inserting a
//! new name takes the exclusive side of that one shard.
//!
//! # Builtins
//!
//! Selectors the runtime itself sends (`initialize`, the resolver selectors,
//! the retain/release family) are interned when the registry is first used
//! and exposed through [`builtins`] without touching any lock.

use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

use fxhash::FxBuildHasher;
use hashbrown::HashMap;
use objrt_mem::GlobalArena;
use parking_lot::RwLock;

use crate::error::fatal;

/// Number of registry shards (power of two for masking).
const NUM_SHARDS: usize = 16;

const SHARD_MASK: usize = NUM_SHARDS - 1;

/// Registry arena chunk size; selector names are short.
const ARENA_CHUNK: usize = 64 * 1024;

/// Registry entry for one interned name. Never freed.
pub(crate) struct SelectorEntry {
    name: &'static str,
    hash: u64,
}

/// Opaque, pointer-sized selector handle passed to method implementations.
///
/// Convert back with [`Selector::from_handle`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SelectorHandle(*const SelectorEntry);

// SAFETY: the handle only ever points at an immutable, never-freed entry.
unsafe impl Send for SelectorHandle {}
unsafe impl Sync for SelectorHandle {}

impl fmt::Debug for SelectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SelectorHandle({:p})", self.0)
    }
}

/// An interned method name.
///
/// Equal names always intern to the same `Selector`:
///
/// ```
/// use objrt::Selector;
///
/// let a = Selector::intern("setValue:forKey:");
/// let b: Selector = "setValue:forKey:".parse().unwrap();
///
/// assert_eq!(a, b);
/// assert_eq!(a.name(), "setValue:forKey:");
/// ```
#[derive(Clone, Copy)]
pub struct Selector(&'static SelectorEntry);

struct SelectorRegistry {
    arena: &'static GlobalArena,
    shards: [RwLock<HashMap<&'static str, Selector, FxBuildHasher>>; NUM_SHARDS],
}

static REGISTRY: OnceLock<SelectorRegistry> = OnceLock::new();
static BUILTINS: OnceLock<BuiltinSelectors> = OnceLock::new();

fn registry() -> &'static SelectorRegistry {
    REGISTRY.get_or_init(|| {
        let arena = GlobalArena::try_new(ARENA_CHUNK)
            .unwrap_or_else(|e| fatal(format_args!("selector registry: {e}")));
        SelectorRegistry {
            arena: Box::leak(Box::new(arena)),
            shards: std::array::from_fn(|_| {
                RwLock::new(HashMap::with_hasher(FxBuildHasher::default()))
            }),
        }
    })
}

#[inline]
fn shard_index(hash: u64) -> usize {
    #[allow(clippy::cast_possible_truncation)]
    let low = hash as usize;
    low & SHARD_MASK
}

impl SelectorRegistry {
    fn lookup(&self, name: &str, hash: u64) -> Option<Selector> {
        self.shards[shard_index(hash)].read().get(name).copied()
    }

    fn intern(&self, name: &str) -> Selector {
        let hash = fxhash::hash64(name);
        let shard = &self.shards[shard_index(hash)];

        if let Some(&sel) = shard.read().get(name) {
            return sel;
        }

        let mut map = shard.write();
        // Another thread may have won the race for the write lock.
        if let Some(&sel) = map.get(name) {
            return sel;
        }

        let name: &'static str = self.arena.try_alloc_str(name).unwrap_or_else(|e| {
            fatal(format_args!("interning selector '{name}': {e}"))
        });
        let entry: &'static SelectorEntry = self
            .arena
            .try_alloc(SelectorEntry { name, hash })
            .unwrap_or_else(|e| fatal(format_args!("interning selector '{name}': {e}")));

        let sel = Selector(entry);
        map.insert(name, sel);
        sel
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }
}

impl Selector {
    /// Returns the selector for `name`, interning it on first use.
    ///
    /// Thread-safe; concurrent callers with the same name get the same
    /// selector. Running out of memory while interning is fatal.
    pub fn intern(name: &str) -> Selector {
        registry().intern(name)
    }

    /// Returns the selector for `name` if it has already been interned.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Selector> {
        registry().lookup(name, fxhash::hash64(name))
    }

    /// Number of distinct selectors interned so far.
    #[must_use]
    pub fn registered_count() -> usize {
        registry().len()
    }

    /// The interned name.
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        self.0.name
    }

    /// Hash of the name computed at interning time.
    #[inline]
    #[must_use]
    pub fn hash_code(self) -> u64 {
        self.0.hash
    }

    /// Identity key used by method caches and sorted method lists.
    /// Never zero.
    #[inline]
    pub(crate) fn key(self) -> usize {
        std::ptr::from_ref(self.0).expose_provenance()
    }

    /// Recovers a selector from a key produced by [`Selector::key`].
    ///
    /// # Safety
    ///
    /// `key` must have come from `Selector::key`.
    #[inline]
    pub(crate) unsafe fn from_key(key: usize) -> Selector {
        // SAFETY: keys are addresses of registry entries, which are never
        // freed; the caller guarantees provenance.
        Selector(unsafe { &*std::ptr::with_exposed_provenance::<SelectorEntry>(key) })
    }

    /// Converts to the FFI handle passed as `_cmd`.
    #[inline]
    #[must_use]
    pub fn as_handle(self) -> SelectorHandle {
        SelectorHandle(std::ptr::from_ref(self.0))
    }

    /// Converts an FFI handle back to a selector.
    ///
    /// # Safety
    ///
    /// `handle` must have been produced by [`Selector::as_handle`].
    #[inline]
    #[must_use]
    pub unsafe fn from_handle(handle: SelectorHandle) -> Selector {
        // SAFETY: guaranteed by the caller; entries are never freed.
        Selector(unsafe { &*handle.0 })
    }
}

impl PartialEq for Selector {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl FromStr for Selector {
    type Err = Infallible;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(Selector::intern(name))
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({:?})", self.0.name)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name)
    }
}

/// Selectors the runtime sends or checks for itself.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinSelectors {
    pub initialize: Selector,
    pub resolve_instance_method: Selector,
    pub resolve_class_method: Selector,
    pub forward: Selector,
    pub load: Selector,
    pub alloc: Selector,
    pub dealloc: Selector,
    pub retain: Selector,
    pub release: Selector,
    pub autorelease: Selector,
    pub responds_to_selector: Selector,
    pub does_not_recognize_selector: Selector,
}

/// Returns the pre-interned builtin selectors.
///
/// After the first call this is a single atomic load.
pub fn builtins() -> &'static BuiltinSelectors {
    BUILTINS.get_or_init(|| BuiltinSelectors {
        initialize: Selector::intern("initialize"),
        resolve_instance_method: Selector::intern("resolveInstanceMethod:"),
        resolve_class_method: Selector::intern("resolveClassMethod:"),
        forward: Selector::intern("forward::"),
        load: Selector::intern("load"),
        alloc: Selector::intern("alloc"),
        dealloc: Selector::intern("dealloc"),
        retain: Selector::intern("retain"),
        release: Selector::intern("release"),
        autorelease: Selector::intern("autorelease"),
        responds_to_selector: Selector::intern("respondsToSelector:"),
        does_not_recognize_selector: Selector::intern("doesNotRecognizeSelector:"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_intern_is_idempotent() {
        let a = Selector::intern("selector_test_idempotent");
        let b = Selector::intern("selector_test_idempotent");

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.name(), "selector_test_idempotent");
    }

    #[test]
    fn test_distinct_names_distinct_selectors() {
        let a = Selector::intern("selector_test_a:");
        let b = Selector::intern("selector_test_b:");
        assert_ne!(a, b);
    }

    #[test]
    fn test_lookup_does_not_intern() {
        assert!(Selector::lookup("selector_test_never_interned_xyz").is_none());

        let sel = Selector::intern("selector_test_lookup");
        assert_eq!(Selector::lookup("selector_test_lookup"), Some(sel));
    }

    #[test]
    fn test_registered_count_grows() {
        let before = Selector::registered_count();
        Selector::intern("selector_test_count_fresh");
        Selector::intern("selector_test_count_fresh");
        // Other tests intern concurrently, so only a lower bound holds.
        assert!(Selector::registered_count() > before);
    }

    #[test]
    fn test_handle_round_trip() {
        let sel = Selector::intern("selector_test_handle");
        // SAFETY: handle produced by as_handle.
        let back = unsafe { Selector::from_handle(sel.as_handle()) };
        assert_eq!(sel, back);
    }

    #[test]
    fn test_key_round_trip() {
        let sel = Selector::intern("selector_test_key");
        // SAFETY: key produced by Selector::key.
        assert_eq!(unsafe { Selector::from_key(sel.key()) }, sel);
    }

    #[test]
    fn test_builtins_are_interned() {
        let b = builtins();
        assert_eq!(b.initialize, Selector::intern("initialize"));
        assert_eq!(b.forward.name(), "forward::");
        assert_eq!(
            Selector::lookup("doesNotRecognizeSelector:"),
            Some(b.does_not_recognize_selector)
        );
    }

    #[test]
    fn test_hash_uses_precomputed_value() {
        let sel = Selector::intern("selector_test_hash");
        let mut set = HashSet::new();
        set.insert(sel);
        assert!(set.contains(&Selector::intern("selector_test_hash")));
        assert_eq!(sel.hash_code(), fxhash::hash64("selector_test_hash"));
    }

    #[test]
    fn test_concurrent_interning() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    (0..200)
                        .map(|i| Selector::intern(&format!("selector_test_concurrent_{i}")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<Selector>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        for other in &results[1..] {
            assert_eq!(&results[0], other);
        }
    }
}
