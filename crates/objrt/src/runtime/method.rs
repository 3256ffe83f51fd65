//! Method implementations and method lists.

use std::ffi::c_void;
use std::fmt;

use objrt_log::warn;

use super::selector::{Selector, SelectorHandle};

/// C-ABI signature of a method implementation.
///
/// Arguments are the receiver, the selector that was sent, a pointer to the
/// argument array and a pointer to storage for the return value.
pub type RawImp = unsafe extern "C" fn(
    receiver: *mut c_void,
    cmd: SelectorHandle,
    args: *const *mut u8,
    ret: *mut u8,
);

/// A method implementation pointer.
///
/// [`Imp::FORWARD`] is the forwarding sentinel returned by lookup when no
/// class in the chain implements a selector.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Imp(RawImp);

/// Target of [`Imp::FORWARD`]. Calling it reports the unrecognized selector.
unsafe extern "C" fn message_forward(
    receiver: *mut c_void,
    cmd: SelectorHandle,
    _args: *const *mut u8,
    _ret: *mut u8,
) {
    // SAFETY: the runtime only ever passes handles of interned selectors.
    let sel = unsafe { Selector::from_handle(cmd) };
    warn!("{receiver:p} does not recognize selector '{sel}'");
}

impl Imp {
    /// The forwarding sentinel.
    pub const FORWARD: Imp = Imp(message_forward);

    #[inline]
    #[must_use]
    pub const fn new(raw: RawImp) -> Imp {
        Imp(raw)
    }

    #[inline]
    #[must_use]
    pub fn is_forward(self) -> bool {
        self.addr() == Imp::FORWARD.addr()
    }

    #[inline]
    #[must_use]
    pub fn as_raw(self) -> RawImp {
        self.0
    }

    #[inline]
    pub(crate) fn addr(self) -> usize {
        self.0 as usize
    }

    /// # Safety
    ///
    /// `addr` must have come from [`Imp::addr`].
    #[inline]
    pub(crate) unsafe fn from_addr(addr: usize) -> Imp {
        // SAFETY: addr is a function address produced by Imp::addr, so it is
        // non-null and points at a function with the RawImp signature.
        Imp(unsafe { std::mem::transmute::<usize, RawImp>(addr) })
    }

    /// Calls the implementation.
    ///
    /// # Safety
    ///
    /// The implementation's expectations about `receiver`, `args` and `ret`
    /// must be met by the caller.
    #[inline]
    pub unsafe fn call(
        self,
        receiver: *mut c_void,
        sel: Selector,
        args: *const *mut u8,
        ret: *mut u8,
    ) {
        // SAFETY: forwarded to the caller.
        unsafe { (self.0)(receiver, sel.as_handle(), args, ret) }
    }
}

impl PartialEq for Imp {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Imp {}

impl fmt::Debug for Imp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_forward() {
            f.write_str("Imp(FORWARD)")
        } else {
            write!(f, "Imp({:#x})", self.addr())
        }
    }
}

/// A (selector, type encoding, implementation) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Method {
    selector: Selector,
    types: &'static str,
    imp: Imp,
}

impl Method {
    pub(crate) fn new(selector: Selector, types: &'static str, imp: Imp) -> Method {
        Method { selector, types, imp }
    }

    #[must_use]
    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// Type encoding of the method signature, e.g. `"v@:"`.
    #[must_use]
    pub fn types(&self) -> &'static str {
        self.types
    }

    #[must_use]
    pub fn imp(&self) -> Imp {
        self.imp
    }
}

/// Lists longer than this are binary searched.
const LINEAR_SEARCH_LIMIT: usize = 8;

/// An immutable, fixed-up method list.
///
/// Fixed up means the selectors are interned, duplicates are dropped and the
/// entries are sorted by selector key. Lists are never edited in place; a
/// changed implementation produces a new list.
#[derive(Debug, Clone)]
pub(crate) struct MethodList {
    methods: Vec<Method>,
}

impl MethodList {
    /// Fixes up `methods` for searching. Duplicate selectors keep their
    /// first occurrence.
    pub(crate) fn fixed_up(owner: &str, methods: Vec<Method>) -> MethodList {
        let mut seen = hashbrown::HashSet::with_capacity(methods.len());
        let mut kept = Vec::with_capacity(methods.len());

        for method in methods {
            if seen.insert(method.selector) {
                kept.push(method);
            } else {
                warn!(
                    "{owner}: duplicate method '{}' in one method list, keeping the first",
                    method.selector
                );
            }
        }

        kept.sort_unstable_by_key(|m| m.selector.key());
        MethodList { methods: kept }
    }

    pub(crate) fn single(method: Method) -> MethodList {
        MethodList { methods: vec![method] }
    }

    pub(crate) fn find(&self, sel: Selector) -> Option<&Method> {
        let key = sel.key();

        if self.methods.len() <= LINEAR_SEARCH_LIMIT {
            return self.methods.iter().find(|m| m.selector == sel);
        }

        let idx = self.methods.partition_point(|m| m.selector.key() < key);
        self.methods.get(idx).filter(|m| m.selector == sel)
    }

    /// Copy of this list with `sel` bound to `imp`.
    pub(crate) fn with_imp(&self, sel: Selector, imp: Imp) -> MethodList {
        let methods = self
            .methods
            .iter()
            .map(|m| if m.selector == sel { Method { imp, ..*m } } else { *m })
            .collect();
        MethodList { methods }
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, Method> {
        self.methods.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.methods.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
