//! Method lookup.
//!
//! Lookup walks four states:
//!
//! 1. **Cache check**: a lock-free search of the receiver class's cache.
//! 2. **Method-list scan**: under the shared runtime lock, the method lists
//!    of the class and then each superclass are searched; the first match
//!    wins and is filled into the receiver class's cache.
//! 3. **Resolver**: with no runtime lock held, the per-class resolver hook
//!    (or, failing that, the runtime-wide one) may add the method. If it
//!    reports success the scan is retried once.
//! 4. **Forwarding**: [`Imp::FORWARD`] is cached for the selector so
//!    repeated sends of an unknown message stay on the fast path.
//!
//! The resolver runs once per class and selector. Normally the cached
//! forwarding entry is what stops a second call. Before `initialize` has
//! finished nothing may be cached, so the class's cache also remembers which
//! selectors the resolver declined; a flush forgets them along with the
//! entries.

use bitflags::bitflags;
use objrt_log::info;

use super::class::Class;
use super::method::Imp;
use super::selector::Selector;
use super::{Runtime, RuntimeState};

/// Resolver hook: given the class a lookup missed on and the selector, may
/// add a method (for example with [`Runtime::add_method`]) and return true.
///
/// For class methods the class passed is the metaclass.
pub type ResolverHook = fn(&Runtime, Class, Selector) -> bool;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct LookupBehavior: u8 {
        /// Run `initialize` on the class first if needed.
        const INITIALIZE = 1 << 0;
        /// Consult the resolver hooks on a miss.
        const RESOLVER = 1 << 1;
    }
}

impl Runtime {
    /// Returns the implementation `class` uses for `sel`.
    ///
    /// Runs `initialize` on the class if it has not been initialized and
    /// consults the resolver hooks on a miss. Returns [`Imp::FORWARD`] if
    /// nothing implements `sel`.
    pub fn lookup(&self, class: Class, sel: Selector) -> Imp {
        self.lookup_imp(class, sel, LookupBehavior::INITIALIZE | LookupBehavior::RESOLVER)
    }

    /// Like [`lookup`](Self::lookup) but returns `None` instead of the
    /// forwarding sentinel.
    pub fn lookup_nonforwarding(&self, class: Class, sel: Selector) -> Option<Imp> {
        Some(self.lookup(class, sel)).filter(|imp| !imp.is_forward())
    }

    /// True if instances of `class` respond to `sel`.
    ///
    /// Does not run `initialize`; the resolver hooks may still be called.
    pub fn responds_to(&self, class: Class, sel: Selector) -> bool {
        !self.lookup_imp(class, sel, LookupBehavior::RESOLVER).is_forward()
    }

    /// Installs or clears the runtime-wide resolver hook.
    pub fn set_resolver(&self, hook: Option<ResolverHook>) {
        *self.resolver.write() = hook;
    }

    /// Installs or clears the resolver hook of `class`.
    ///
    /// Per-class hooks are inherited by subclasses and take priority over
    /// the runtime-wide hook. Lookups of class methods consult the hook of
    /// the instance class chain.
    pub fn set_class_resolver(&self, class: Class, hook: Option<ResolverHook>) {
        let _state = self.state.write();
        class.instance_class().rw_mut().resolver = hook;
    }

    /// Lock-free cache search.
    #[inline]
    pub(crate) fn cached(&self, class: Class, sel: Selector) -> Option<Imp> {
        class.cache().find(sel)
    }

    pub(crate) fn lookup_imp(&self, class: Class, sel: Selector, behavior: LookupBehavior) -> Imp {
        if let Some(imp) = self.cached(class, sel) {
            self.stats.hit();
            return imp;
        }
        self.stats.miss();

        if !class.is_dispatchable() {
            return Imp::FORWARD;
        }

        if behavior.contains(LookupBehavior::INITIALIZE) {
            self.initialize_class(class.instance_class());
        }

        let mut resolver_tried = false;
        let mut scan = true;

        loop {
            let hook = {
                let state = self.state.read();

                if !class.is_dispatchable() {
                    return Imp::FORWARD;
                }
                // Another thread may have filled the cache while we waited.
                if let Some(imp) = self.cached(class, sel) {
                    return imp;
                }

                if scan {
                    if let Some(imp) = self.scan_chain(&state, class, sel) {
                        self.fill_if_initialized(class, sel, imp);
                        if resolver_tried && self.config().print_resolved_methods {
                            info!(
                                "RESOLVE: method {}{} {sel} dynamically resolved to {imp:?}",
                                if class.is_metaclass() { "+" } else { "-" },
                                class.name()
                            );
                        }
                        return imp;
                    }
                }

                if resolver_tried
                    || !behavior.contains(LookupBehavior::RESOLVER)
                    || class.cache().was_declined(sel)
                {
                    None
                } else {
                    self.resolver_for(class)
                }
            };

            let Some(hook) = hook else {
                return self.forward_fallback(class, sel, resolver_tried);
            };

            resolver_tried = true;
            self.stats.resolve();
            scan = hook(self, class, sel);
        }
    }

    /// Searches the method lists of `class` and its superclasses.
    pub(crate) fn scan_chain(&self, _state: &RuntimeState, class: Class, sel: Selector) -> Option<Imp> {
        self.stats.scan();
        class
            .chain()
            .find_map(|c| c.rw().find_method(sel).map(|m| m.imp()))
    }

    fn resolver_for(&self, class: Class) -> Option<ResolverHook> {
        class
            .instance_class()
            .chain()
            .find_map(|c| c.rw().resolver)
            .or_else(|| *self.resolver.read())
    }

    /// Ends a lookup nothing answered. `declined` records that the resolver
    /// ran and did not supply the method.
    fn forward_fallback(&self, class: Class, sel: Selector, declined: bool) -> Imp {
        let _state = self.state.read();
        if let Some(imp) = self.cached(class, sel) {
            return imp;
        }
        if class.is_dispatchable() {
            if declined {
                class.cache().decline(sel);
            }
            self.fill_if_initialized(class, sel, Imp::FORWARD);
        }
        self.stats.forward();
        Imp::FORWARD
    }

    /// Nothing is cached for a class before its `initialize` has finished,
    /// so the first send through the cache always initializes.
    fn fill_if_initialized(&self, class: Class, sel: Selector, imp: Imp) {
        if self.is_initialized(class) {
            self.cache_fill(class, sel, imp);
        }
    }
}
