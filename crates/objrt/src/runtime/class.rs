//! Realized classes.
//!
//! A class is split the way it is authored and then used:
//!
//! - [`ClassRo`]: read-only data as described by the descriptor (name,
//!   instance layout, base methods, ivars). Shared behind an `Arc`; classes
//!   under construction get a private copy they may still edit.
//! - [`ClassRw`]: the mutable overlay that realization, categories and the
//!   construction API edit: method lists, protocols, properties and the
//!   subclass forest links.
//! - [`ClassObject`]: the stable record a [`Class`] handle points at. It owns
//!   the method cache, the state flags and the overlay.
//!
//! # Handles
//!
//! A [`Class`] is a `Copy` reference to its `ClassObject`. Class objects are
//! allocated in the runtime arena and never freed, so a handle stays valid
//! for the life of the runtime even after the class is disposed. Equality
//! and hashing use the object's address, never the name: a disposed class
//! and a later class with the same name are different classes.
//!
//! # Links
//!
//! The metaclass (`isa`), superclass and instance-class links are atomic
//! pointers. They are written while the runtime lock is held exclusively and
//! read without it, so dispatch can walk the superclass chain while another
//! thread realizes classes elsewhere in the graph.
//!
//! # State flags
//!
//! [`ClassFlags`] live in one `AtomicU32`. Transitions that clear one flag
//! and set another (`INITIALIZING` to `INITIALIZED`, `FUTURE` to `REALIZED`)
//! go through [`Class::change_info`] so no reader ever sees both or neither.
//!
//! # Locking
//!
//! The overlay is edited only while the runtime lock is held exclusively;
//! lock order is runtime lock → overlay lock → cache lock. The cache is read
//! without any lock.

use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use bitflags::bitflags;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::cache::MethodCache;
use super::ivar::{Ivar, word_align};
use super::lookup::ResolverHook;
use super::method::{Method, MethodList};
use super::protocol::{Property, Protocol};
use super::selector::Selector;

bitflags! {
    /// Runtime state of a class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassFlags: u32 {
        /// Linked into the class graph and ready for dispatch.
        const REALIZED = 1 << 0;
        /// Waiting for its superclass to be loaded.
        const FUTURE = 1 << 1;
        /// `initialize` is running.
        const INITIALIZING = 1 << 2;
        const INITIALIZED = 1 << 3;
        /// Allocated through the construction API, not yet registered.
        const CONSTRUCTING = 1 << 4;
        /// Registered after construction.
        const CONSTRUCTED = 1 << 5;
        const META = 1 << 6;
        const ROOT = 1 << 7;
        /// Never dispatches; every lookup forwards.
        const INERT = 1 << 8;
        const DISPOSED = 1 << 9;
    }
}

bitflags! {
    /// Flags carried by read-only class data.
    ///
    /// These describe the class as authored and never change after
    /// realization, unlike [`ClassFlags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RoFlags: u32 {
        /// The data describes a metaclass.
        const META = 1 << 0;
        /// The class has no superclass.
        const ROOT = 1 << 1;
        /// Instances need constructor/destructor hooks run.
        const HAS_CXX_STRUCTORS = 1 << 2;
        /// Hidden from symbol-level introspection.
        const HIDDEN = 1 << 4;
        /// The class is an exception type.
        const EXCEPTION = 1 << 5;
    }
}

/// Read-only class data.
///
/// Built once from a descriptor during realization (or by the construction
/// API) and then shared. Realization may rewrite `instance_start`,
/// `instance_size` and ivar offsets before the data is published, when the
/// superclass grew since the descriptor was written.
#[derive(Debug, Clone)]
pub(crate) struct ClassRo {
    pub(crate) flags: RoFlags,
    /// Offset of the first ivar this class declares; equals the
    /// superclass's instance size after sliding.
    pub(crate) instance_start: usize,
    /// Unaligned instance size in bytes, including inherited ivars.
    pub(crate) instance_size: usize,
    pub(crate) name: &'static str,
    /// Methods from the descriptor, sorted by selector key.
    pub(crate) base_methods: Option<Arc<MethodList>>,
    pub(crate) base_protocols: Vec<Protocol>,
    /// Ivars this class declares, not inherited ones, in declaration order.
    pub(crate) ivars: Vec<Ivar>,
    pub(crate) base_properties: Vec<Property>,
}

impl ClassRo {
    /// Read-only data with no methods, ivars or protocols.
    pub(crate) fn empty(name: &'static str, flags: RoFlags) -> ClassRo {
        ClassRo {
            flags,
            instance_start: 0,
            instance_size: 0,
            name,
            base_methods: None,
            base_protocols: Vec::new(),
            ivars: Vec::new(),
            base_properties: Vec::new(),
        }
    }
}

/// Mutable overlay of a realized class.
///
/// Starts as a copy of the read-only lists and grows as categories attach
/// and methods are added at run time. Dispatch scans `methods`; the
/// introspection queries read the rest.
pub(crate) struct ClassRw {
    pub(crate) ro: Arc<ClassRo>,
    /// Searched front to back; categories and added methods are prepended.
    pub(crate) methods: Vec<Arc<MethodList>>,
    pub(crate) protocols: Vec<Protocol>,
    pub(crate) properties: Vec<Property>,
    /// Head of this class's subclass list in the forest.
    pub(crate) first_subclass: Option<Class>,
    /// Next class sharing this class's superclass.
    pub(crate) next_sibling: Option<Class>,
    /// Names of attached categories, in attach order.
    pub(crate) categories: Vec<&'static str>,
    /// Per-class resolver, consulted before the runtime-wide one.
    pub(crate) resolver: Option<ResolverHook>,
}

impl ClassRw {
    /// Overlay seeded from `ro`'s base lists.
    pub(crate) fn new(ro: Arc<ClassRo>) -> ClassRw {
        ClassRw {
            methods: ro.base_methods.iter().cloned().collect(),
            protocols: ro.base_protocols.clone(),
            properties: ro.base_properties.clone(),
            ro,
            first_subclass: None,
            next_sibling: None,
            categories: Vec::new(),
            resolver: None,
        }
    }

    /// The method this class itself defines for `sel`, if any.
    pub(crate) fn find_method(&self, sel: Selector) -> Option<&Method> {
        self.methods.iter().find_map(|list| list.find(sel))
    }

    /// Index of the first method list defining `sel`.
    pub(crate) fn list_index(&self, sel: Selector) -> Option<usize> {
        self.methods.iter().position(|list| list.find(sel).is_some())
    }

    /// Puts `list` in front of every existing list so its methods win.
    /// Empty lists are dropped.
    pub(crate) fn prepend_methods(&mut self, list: MethodList) {
        if !list.is_empty() {
            self.methods.insert(0, Arc::new(list));
        }
    }
}

/// The record behind a [`Class`] handle. Allocated in the runtime arena and
/// never moved or freed.
pub(crate) struct ClassObject {
    name: &'static str,
    /// The metaclass; for a metaclass, the root metaclass.
    isa: AtomicPtr<ClassObject>,
    superclass: AtomicPtr<ClassObject>,
    /// For a metaclass, the class it describes; null otherwise.
    instance_class: AtomicPtr<ClassObject>,
    flags: AtomicU32,
    pub(crate) cache: MethodCache,
    pub(crate) rw: RwLock<ClassRw>,
}

impl ClassObject {
    pub(crate) fn new(name: &'static str, flags: ClassFlags, ro: ClassRo) -> ClassObject {
        ClassObject {
            name,
            isa: AtomicPtr::new(ptr::null_mut()),
            superclass: AtomicPtr::new(ptr::null_mut()),
            instance_class: AtomicPtr::new(ptr::null_mut()),
            flags: AtomicU32::new(flags.bits()),
            cache: MethodCache::new(),
            rw: RwLock::new(ClassRw::new(Arc::new(ro))),
        }
    }
}

fn load(slot: &AtomicPtr<ClassObject>) -> Option<Class> {
    // SAFETY: non-null slots always point at arena-allocated class objects,
    // which live as long as the runtime.
    NonNull::new(slot.load(Ordering::Acquire)).map(|p| Class(unsafe { &*p.as_ptr() }))
}

fn store(slot: &AtomicPtr<ClassObject>, class: Option<Class>) {
    let p = class.map_or(ptr::null_mut(), |c| ptr::from_ref(c.0).cast_mut());
    slot.store(p, Ordering::Release);
}

/// Handle to a class or metaclass.
///
/// Handles are `Copy` and compare by identity. They stay memory-safe for the
/// life of the runtime, including after the class is disposed.
#[derive(Clone, Copy)]
pub struct Class(&'static ClassObject);

impl Class {
    pub(crate) fn from_object(object: &'static ClassObject) -> Class {
        Class(object)
    }

    /// The class name. A metaclass has the same name as its class.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.0.name
    }

    /// Current state flags. May change as soon as this returns.
    #[must_use]
    pub fn flags(self) -> ClassFlags {
        ClassFlags::from_bits_retain(self.0.flags.load(Ordering::Acquire))
    }

    /// The superclass, `None` for a root class. The superclass of a root
    /// metaclass is the root class itself.
    #[must_use]
    pub fn superclass(self) -> Option<Class> {
        load(&self.0.superclass)
    }

    /// The class's metaclass. `None` while the class is parked or inert.
    #[must_use]
    pub fn metaclass(self) -> Option<Class> {
        load(&self.0.isa)
    }

    #[must_use]
    pub fn is_metaclass(self) -> bool {
        self.flags().contains(ClassFlags::META)
    }

    #[must_use]
    pub fn is_root(self) -> bool {
        self.flags().contains(ClassFlags::ROOT)
    }

    /// For a metaclass, the class it describes; otherwise the class itself.
    #[must_use]
    pub fn instance_class(self) -> Class {
        load(&self.0.instance_class).unwrap_or(self)
    }

    /// Instance size in bytes, rounded up to a word.
    #[must_use]
    pub fn instance_size(self) -> usize {
        word_align(self.0.rw.read().ro.instance_size)
    }

    /// Pointer passed as the receiver when a message is sent to the class
    /// itself (for example `initialize`).
    #[must_use]
    pub fn as_ptr(self) -> *mut c_void {
        ptr::from_ref(self.0).cast_mut().cast()
    }

    /// Recovers a class from [`Class::as_ptr`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `Class::as_ptr`.
    #[must_use]
    pub unsafe fn from_ptr(ptr: *mut c_void) -> Class {
        // SAFETY: guaranteed by the caller; class objects are never freed.
        Class(unsafe { &*ptr.cast::<ClassObject>() })
    }

    #[inline]
    pub(crate) fn cache(self) -> &'static MethodCache {
        &self.0.cache
    }

    pub(crate) fn rw(self) -> RwLockReadGuard<'static, ClassRw> {
        self.0.rw.read()
    }

    pub(crate) fn rw_mut(self) -> RwLockWriteGuard<'static, ClassRw> {
        self.0.rw.write()
    }

    pub(crate) fn try_rw(self) -> Option<RwLockReadGuard<'static, ClassRw>> {
        self.0.rw.try_read()
    }

    pub(crate) fn set_isa(self, isa: Class) {
        store(&self.0.isa, Some(isa));
    }

    pub(crate) fn set_superclass(self, superclass: Option<Class>) {
        store(&self.0.superclass, superclass);
    }

    pub(crate) fn set_instance_class(self, class: Class) {
        store(&self.0.instance_class, Some(class));
    }

    /// Sets `set` without touching other flags.
    pub(crate) fn set_info(self, set: ClassFlags) {
        self.0.flags.fetch_or(set.bits(), Ordering::AcqRel);
    }

    /// Sets and clears flags in one atomic step.
    pub(crate) fn change_info(self, set: ClassFlags, clear: ClassFlags) {
        let _ = self
            .0
            .flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((bits & !clear.bits()) | set.bits())
            });
    }

    /// True if the class can take part in dispatch.
    pub(crate) fn is_dispatchable(self) -> bool {
        !self
            .flags()
            .intersects(ClassFlags::FUTURE | ClassFlags::INERT | ClassFlags::DISPOSED)
    }

    /// Iterates this class and its superclasses, nearest first.
    pub(crate) fn chain(self) -> impl Iterator<Item = Class> {
        std::iter::successors(Some(self), |c| c.superclass())
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for Class {}

impl Hash for Class {
    fn hash<H: Hasher>(&self, state: &mut H) {
        ptr::hash(self.0, state);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_metaclass() {
            write!(f, "Class(meta {})", self.0.name)
        } else {
            write!(f, "Class({})", self.0.name)
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name)
    }
}
