//! The `objrt` runtime.
//!
//! A [`Runtime`] owns the class graph, the runtime lock, the resolver hooks,
//! dispatch statistics and the arena every class record is allocated in.
//! Selectors are process-wide and shared by every runtime.
//!
//! # Modules
//!
//! - [`selector`]: selector interning
//! - [`cache`]: lock-free method caches
//! - [`class`], [`method`], [`ivar`], [`protocol`]: class metadata
//! - [`descriptor`], [`realize`], [`category`]: turning descriptors into
//!   linked classes
//! - [`lookup`], [`initialize`]: message lookup
//! - [`builder`], [`introspection`], [`debug`]: dynamic classes and queries
//!
//! # Locking
//!
//! Structural changes (realization, categories, construction) take the
//! runtime lock exclusively. Method-list scans take it shared. Cache fills
//! take the target class's cache lock. Lock order is runtime lock → class
//! overlay lock → class cache lock. Cache searches take no lock at all.
//!
//! Runtimes are leaked: class handles borrow from them for `'static`.

pub mod builder;
pub mod cache;
pub mod category;
pub mod class;
pub mod debug;
pub mod descriptor;
pub mod initialize;
pub mod introspection;
pub mod ivar;
pub mod lookup;
pub mod method;
pub mod protocol;
pub mod realize;
pub mod selector;
mod stats;

use std::sync::{Arc, OnceLock};

use fxhash::FxBuildHasher;
use hashbrown::HashMap;
use objrt_mem::GlobalArena;
use parking_lot::RwLock;

use crate::config::RuntimeConfig;
use crate::error::fatal;

pub use class::{Class, ClassFlags, RoFlags};
pub use descriptor::{
    CategoryDescriptor, ClassDescriptor, Image, IvarDescriptor, MethodDescriptor,
    MethodSignature, PropertyDescriptor, ProtocolDescriptor,
};
pub use ivar::Ivar;
pub use lookup::ResolverHook;
pub use method::{Imp, Method, RawImp};
pub use protocol::{MethodDescription, Property, Protocol};
pub use realize::LoadReport;
pub use selector::{BuiltinSelectors, Selector, SelectorHandle, builtins};
pub use stats::StatsSnapshot;

use class::ClassObject;
use initialize::InitTable;
use protocol::ProtocolObject;
use stats::RuntimeStats;

/// Arena chunk size for class records and metadata strings.
const ARENA_CHUNK: usize = 256 * 1024;

type FxHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// A realized or rejected class together with the descriptor it came from.
///
/// The descriptor is held so its address stays unique for as long as the
/// entry exists.
pub(crate) struct DescribedClass {
    pub(crate) descriptor: Arc<ClassDescriptor>,
    pub(crate) class: Class,
}

/// A class parked until its superclass appears.
pub(crate) struct FutureClass {
    pub(crate) class: Class,
    pub(crate) descriptor: Arc<ClassDescriptor>,
    pub(crate) superclass: String,
}

/// Everything guarded by the runtime lock.
#[derive(Default)]
pub(crate) struct RuntimeState {
    /// Realized and registered classes, by name.
    pub(crate) classes: FxHashMap<&'static str, Class>,
    /// Names held by classes still under construction.
    pub(crate) reserved: FxHashMap<&'static str, Class>,
    pub(crate) future: FxHashMap<&'static str, FutureClass>,
    /// Superclass name → names of classes parked on it.
    pub(crate) waiting: FxHashMap<String, Vec<&'static str>>,
    /// Class built from each descriptor, keyed by the descriptor's `Arc`
    /// address.
    pub(crate) descriptors: FxHashMap<usize, DescribedClass>,
    /// Categories whose class has not been realized yet, by class name.
    pub(crate) unattached: FxHashMap<String, Vec<Arc<CategoryDescriptor>>>,
    pub(crate) protocols: FxHashMap<&'static str, Protocol>,
    /// Root classes of the subclass forest.
    pub(crate) roots: Vec<Class>,
}

impl RuntimeState {
    /// True if `name` is taken by a realized, parked or constructing class.
    pub(crate) fn name_taken(&self, name: &str) -> bool {
        self.classes.contains_key(name)
            || self.reserved.contains_key(name)
            || self.future.contains_key(name)
    }
}

/// An object runtime: class graph, caches, hooks and statistics.
pub struct Runtime {
    config: RuntimeConfig,
    arena: &'static GlobalArena,
    pub(crate) state: RwLock<RuntimeState>,
    pub(crate) stats: RuntimeStats,
    pub(crate) resolver: RwLock<Option<ResolverHook>>,
    pub(crate) init: InitTable,
}

static GLOBAL: OnceLock<&'static Runtime> = OnceLock::new();

impl Runtime {
    /// Creates a runtime that lives for the rest of the process.
    pub fn new(config: RuntimeConfig) -> &'static Runtime {
        if let Some(level) = config.log_level {
            objrt_log::set_level(level);
        }

        let arena = GlobalArena::try_new(ARENA_CHUNK)
            .unwrap_or_else(|e| fatal(format_args!("runtime arena: {e}")));

        // Builtins are interned up front so the hot paths never intern.
        let _ = selector::builtins();

        Box::leak(Box::new(Runtime {
            config,
            arena: Box::leak(Box::new(arena)),
            state: RwLock::new(RuntimeState::default()),
            stats: RuntimeStats::default(),
            resolver: RwLock::new(None),
            init: InitTable::default(),
        }))
    }

    /// The process-wide runtime, created with the default configuration on
    /// first use.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| Runtime::new(RuntimeConfig::default()))
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Snapshot of the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Empties the caches of `class` and every class below it.
    pub fn flush_caches(&self, class: Class) {
        let state = self.state.read();
        self.flush_subtree_caches(&state, class);
    }

    pub(crate) fn copy_str(&self, s: &str) -> &'static str {
        self.arena
            .try_alloc_str(s)
            .unwrap_or_else(|e| fatal(format_args!("copying '{s}': {e}")))
    }

    pub(crate) fn alloc_class(&self, object: ClassObject) -> Class {
        let object: &'static ClassObject = self
            .arena
            .try_alloc(object)
            .unwrap_or_else(|e| fatal(format_args!("allocating class: {e}")));
        Class::from_object(object)
    }

    pub(crate) fn alloc_protocol(&self, object: ProtocolObject) -> Protocol {
        let object: &'static ProtocolObject = self
            .arena
            .try_alloc(object)
            .unwrap_or_else(|e| fatal(format_args!("allocating protocol: {e}")));
        Protocol(object)
    }

    /// Caches `sel → imp` in `class`, counting the fill and any growth.
    pub(crate) fn cache_fill(&self, class: Class, sel: Selector, imp: Imp) {
        let outcome = class.cache().insert(sel, imp, self.config.cache_capacity());
        self.stats.fill();
        if let cache::Insert::Grew { retired } = outcome {
            self.stats.grow();
            objrt_log::trace!(
                "grew method cache of {}{} for '{sel}'",
                if class.is_metaclass() { "+" } else { "" },
                class.name()
            );
            self.report_retired(class, retired);
        }
    }

    pub(crate) fn cache_flush(&self, class: Class) {
        if let Some(retired) = class.cache().flush() {
            self.stats.flush();
            self.report_retired(class, retired);
        }
    }

    /// A swapped-out table is freed once the last reader still searching it
    /// is done.
    fn report_retired(&self, class: Class, capacity: usize) {
        if capacity > 0 && self.config.print_cache_collection {
            objrt_log::info!(
                "CACHES: retired {capacity}-entry cache table of {}{}",
                if class.is_metaclass() { "+" } else { "-" },
                class.name()
            );
        }
    }

    /// Flushes the caches of every class below `class`, not `class` itself.
    pub(crate) fn flush_subclass_caches(&self, _state: &RuntimeState, class: Class) {
        for sub in forest::descendants(class) {
            self.cache_flush(sub);
        }
    }

    /// Flushes the caches of `class` and every class below it.
    pub(crate) fn flush_subtree_caches(&self, state: &RuntimeState, class: Class) {
        self.cache_flush(class);
        self.flush_subclass_caches(state, class);
    }

    /// Resolves protocol names, logging and skipping unknown ones.
    pub(crate) fn protocols_named(
        &self,
        state: &RuntimeState,
        owner: &str,
        names: &[String],
    ) -> Vec<Protocol> {
        names
            .iter()
            .filter_map(|name| {
                let found = state.protocols.get(name.as_str()).copied();
                if found.is_none() {
                    objrt_log::warn!("{owner}: unknown protocol '{name}' ignored");
                }
                found
            })
            .collect()
    }
}

/// The subclass forest, linked through `first_subclass` / `next_sibling`.
///
/// Callers hold the runtime lock; edits require it exclusively.
pub(crate) mod forest {
    use super::Class;

    pub(crate) fn link(superclass: Class, sub: Class) {
        let mut sup_rw = superclass.rw_mut();
        let mut sub_rw = sub.rw_mut();
        sub_rw.next_sibling = sup_rw.first_subclass.replace(sub);
    }

    pub(crate) fn unlink(superclass: Class, sub: Class) {
        let next = sub.rw_mut().next_sibling.take();

        {
            let mut sup_rw = superclass.rw_mut();
            if sup_rw.first_subclass == Some(sub) {
                sup_rw.first_subclass = next;
                return;
            }
        }

        let mut cursor = superclass.rw().first_subclass;
        while let Some(class) = cursor {
            let mut rw = class.rw_mut();
            if rw.next_sibling == Some(sub) {
                rw.next_sibling = next;
                return;
            }
            cursor = rw.next_sibling;
        }
    }

    pub(crate) fn children(class: Class) -> Vec<Class> {
        let mut out = Vec::new();
        let mut cursor = class.rw().first_subclass;
        while let Some(child) = cursor {
            out.push(child);
            cursor = child.rw().next_sibling;
        }
        out
    }

    /// Every class below `class`, depth first.
    pub(crate) fn descendants(class: Class) -> Vec<Class> {
        let mut out = Vec::new();
        let mut stack = children(class);
        while let Some(next) = stack.pop() {
            stack.extend(children(next));
            out.push(next);
        }
        out
    }
}
