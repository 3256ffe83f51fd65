//! Building classes at run time.
//!
//! [`Runtime::allocate_class`] creates a class and its metaclass in the
//! `CONSTRUCTING` state and reserves the name. Ivars can only be added
//! before [`Runtime::register_class`]; methods, protocols and properties can
//! be added to any live class. A registered class can later be torn down
//! with [`Runtime::dispose_class`].
//!
//! # Lifecycle
//!
//! ```text
//! allocate_class ──► CONSTRUCTING ──register_class──► CONSTRUCTED | REALIZED
//!                                                          │
//!                                                   dispose_class
//!                                                          ▼
//!                                                       DISPOSED
//! ```
//!
//! A class under construction is already linked into the isa graph and the
//! subclass forest, so methods added to it dispatch through its superclass
//! chain, but its name is only reserved: [`Runtime::class_named`] does not
//! find it until it is registered.
//!
//! # Ivar layout
//!
//! The first ivar of a constructed class starts at its superclass's
//! instance size. Each added ivar goes at the next offset aligned to its own
//! alignment, and the instance size ends right after it. Alignment is given
//! as a base-two logarithm.

use std::sync::Arc;

use objrt_log::{debug, info, warn};

use super::class::{Class, ClassFlags, ClassObject, ClassRo, ClassRw, RoFlags};
use super::ivar::{self, Ivar, MAX_ALIGN_LOG2};
use super::method::{Imp, Method, MethodList};
use super::protocol::{Property, Protocol};
use super::realize::link_class;
use super::selector::Selector;
use super::{Runtime, RuntimeState, forest};
use crate::error::{Error, Result};

impl Runtime {
    /// Allocates a new class named `name` under `superclass`, or a new root
    /// class if `superclass` is `None`.
    ///
    /// # Errors
    ///
    /// - [`Error::ClassAlreadyExists`] if the name is taken
    /// - [`Error::ClassNotRegistered`] if `superclass` is not registered
    pub fn allocate_class(&self, superclass: Option<Class>, name: &str) -> Result<Class> {
        let mut state = self.state.write();

        if state.name_taken(name) {
            warn!("cannot allocate class '{name}': the name is taken");
            return Err(Error::ClassAlreadyExists { name: name.to_owned() });
        }

        let superclass = superclass.map(Class::instance_class);
        if let Some(superclass) = superclass {
            if state.classes.get(superclass.name()) != Some(&superclass) {
                return Err(Error::ClassNotRegistered { name: superclass.name().to_owned() });
            }
        }

        let name = self.copy_str(name);
        let start = superclass.map_or(0, |s| s.rw().ro.instance_size);
        let flags = if superclass.is_none() { RoFlags::ROOT } else { RoFlags::empty() };

        let class = self.alloc_class(ClassObject::new(
            name,
            ClassFlags::CONSTRUCTING,
            ClassRo { instance_start: start, instance_size: start, ..ClassRo::empty(name, flags) },
        ));
        let meta = self.alloc_class(ClassObject::new(
            name,
            ClassFlags::CONSTRUCTING | ClassFlags::META,
            ClassRo::empty(name, RoFlags::META),
        ));

        link_class(&mut state, class, meta, superclass);
        if superclass.is_none() {
            class.set_info(ClassFlags::ROOT);
        }
        state.reserved.insert(name, class);

        debug!("allocated class {name}");
        Ok(class)
    }

    /// Adds an ivar to a class under construction, placed after every
    /// existing ivar at the requested alignment.
    ///
    /// # Errors
    ///
    /// - [`Error::IvarOnMetaclass`] for a metaclass
    /// - [`Error::ClassNotConstructing`] once the class is registered
    /// - [`Error::InvalidAlignment`] above 4 KiB alignment
    /// - [`Error::DuplicateIvar`] if the class or a superclass already has
    ///   an ivar with this name
    pub fn add_ivar(
        &self,
        class: Class,
        name: &str,
        size: usize,
        align_log2: u8,
        types: &str,
    ) -> Result<()> {
        let _state = self.state.write();

        if class.is_metaclass() {
            return Err(Error::IvarOnMetaclass { class: class.name().to_owned() });
        }
        if !class.flags().contains(ClassFlags::CONSTRUCTING) {
            return Err(Error::ClassNotConstructing { name: class.name().to_owned() });
        }
        if align_log2 > MAX_ALIGN_LOG2 {
            return Err(Error::InvalidAlignment { align_log2 });
        }
        if class.chain().any(|c| c.rw().ro.ivars.iter().any(|i| i.name() == name)) {
            return Err(Error::DuplicateIvar {
                class: class.name().to_owned(),
                ivar: name.to_owned(),
            });
        }

        let mut rw = class.rw_mut();
        let ro = Arc::make_mut(&mut rw.ro);
        let offset = ivar::align_up(ro.instance_size, 1 << align_log2);
        ro.ivars.push(Ivar::new(
            self.copy_str(name),
            self.copy_str(types),
            offset,
            size,
            align_log2,
        ));
        ro.instance_size = offset + size;

        Ok(())
    }

    /// Adds a method to `class`. Shadows any inherited implementation.
    ///
    /// Subclass caches are flushed; the class's own cache entry for `sel`,
    /// if any, is overwritten in place.
    ///
    /// # Errors
    ///
    /// - [`Error::MethodAlreadyExists`] if the class itself already defines
    ///   `sel`; use [`replace_method`](Self::replace_method) to change it
    /// - [`Error::ClassNotRegistered`] for a parked, inert or disposed class
    pub fn add_method(&self, class: Class, sel: Selector, types: &str, imp: Imp) -> Result<()> {
        let state = self.state.write();

        if !class.is_dispatchable() {
            return Err(Error::ClassNotRegistered { name: class.name().to_owned() });
        }

        {
            let mut rw = class.rw_mut();
            if rw.find_method(sel).is_some() {
                return Err(Error::MethodAlreadyExists {
                    class: class.name().to_owned(),
                    selector: sel.name().to_owned(),
                });
            }
            rw.prepend_methods(MethodList::single(Method::new(sel, self.copy_str(types), imp)));
        }

        self.refresh_caches(&state, class, sel, imp);
        debug!("added {}[{} {sel}]", sign(class), class.name());
        Ok(())
    }

    /// Sets the implementation `class` itself uses for `sel`, adding the
    /// method if the class does not define it.
    ///
    /// Returns the implementation the class defined before, if any. Returns
    /// `None` and changes nothing for a parked, inert or disposed class.
    pub fn replace_method(&self, class: Class, sel: Selector, types: &str, imp: Imp) -> Option<Imp> {
        let state = self.state.write();

        if !class.is_dispatchable() {
            warn!("cannot replace {sel} on unregistered class '{}'", class.name());
            return None;
        }

        let previous = {
            let mut rw = class.rw_mut();
            match rw.list_index(sel) {
                Some(i) => {
                    let previous = rw.methods[i].find(sel).map(Method::imp);
                    let replaced = Arc::new(rw.methods[i].with_imp(sel, imp));
                    rw.methods[i] = replaced;
                    previous
                }
                None => {
                    rw.prepend_methods(MethodList::single(Method::new(sel, self.copy_str(types), imp)));
                    None
                }
            }
        };

        if let Some(previous) = previous {
            if self.config().print_replaced_methods {
                info!(
                    "REPLACED: {}[{} {sel}] {previous:?} by {imp:?}",
                    sign(class),
                    class.name()
                );
            }
        }

        self.refresh_caches(&state, class, sel, imp);
        previous
    }

    /// Overwrites the class's cache entry for `sel`, if present, and
    /// flushes every subclass cache.
    fn refresh_caches(&self, state: &RuntimeState, class: Class, sel: Selector, imp: Imp) {
        if self.cached(class, sel).is_some() {
            self.cache_fill(class, sel, imp);
        }
        self.flush_subclass_caches(state, class);
    }

    /// Adds a protocol to the class's adopted protocols.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolAlreadyAdopted`] if the class already lists it.
    pub fn add_protocol(&self, class: Class, protocol: Protocol) -> Result<()> {
        let _state = self.state.write();
        let class = class.instance_class();

        let mut rw = class.rw_mut();
        if rw.protocols.contains(&protocol) {
            return Err(Error::ProtocolAlreadyAdopted {
                class: class.name().to_owned(),
                protocol: protocol.name().to_owned(),
            });
        }
        rw.protocols.push(protocol);
        Ok(())
    }

    /// Declares a property on the class.
    ///
    /// # Errors
    ///
    /// [`Error::PropertyAlreadyExists`] if the class already declares one
    /// with this name.
    pub fn add_property(&self, class: Class, name: &str, attributes: &str) -> Result<()> {
        let _state = self.state.write();
        let class = class.instance_class();

        let mut rw = class.rw_mut();
        if rw.properties.iter().any(|p| p.name() == name) {
            return Err(Error::PropertyAlreadyExists {
                class: class.name().to_owned(),
                property: name.to_owned(),
            });
        }
        rw.properties.push(Property::new(self.copy_str(name), self.copy_str(attributes)));
        Ok(())
    }

    /// Finishes construction and makes the class visible by name.
    ///
    /// Classes parked on this name are realized and waiting categories are
    /// attached.
    ///
    /// # Errors
    ///
    /// [`Error::ClassNotConstructing`] if the class was not allocated with
    /// [`allocate_class`](Self::allocate_class) or is already registered.
    pub fn register_class(&self, class: Class) -> Result<()> {
        let mut state = self.state.write();
        let class = class.instance_class();
        let name = class.name();

        if !class.flags().contains(ClassFlags::CONSTRUCTING)
            || state.reserved.get(name) != Some(&class)
        {
            return Err(Error::ClassNotConstructing { name: name.to_owned() });
        }

        state.reserved.remove(name);
        let done = ClassFlags::CONSTRUCTED | ClassFlags::REALIZED;
        if let Some(meta) = class.metaclass() {
            meta.change_info(done, ClassFlags::CONSTRUCTING);
        }
        class.change_info(done, ClassFlags::CONSTRUCTING);
        state.classes.insert(name, class);

        if self.config().print_class_setup {
            info!("REGISTER: class {name} {:p}", class.as_ptr());
        } else {
            debug!("registered class {name}");
        }

        self.attach_waiting_categories(&mut state, class);
        self.resume_waiting(&mut state, name);
        Ok(())
    }

    /// Removes a class and its metaclass from the runtime.
    ///
    /// The class must not have subclasses. Once this returns, every lookup
    /// started on the class forwards. The class object itself stays
    /// allocated, so outstanding [`Class`] handles remain safe to use.
    ///
    /// Disposal never waits for readers: cache tables are reference counted
    /// per reader, and method lists are only read under the runtime lock.
    ///
    /// # Errors
    ///
    /// - [`Error::ClassHasSubclasses`] if a subclass still exists
    /// - [`Error::ClassNotRegistered`] if the class is already disposed
    pub fn dispose_class(&self, class: Class) -> Result<()> {
        let class = class.instance_class();
        let name = class.name();
        let Some(meta) = class.metaclass() else {
            return Err(Error::ClassNotRegistered { name: name.to_owned() });
        };

        {
            let mut state = self.state.write();

            if class.flags().intersects(ClassFlags::DISPOSED | ClassFlags::FUTURE) {
                return Err(Error::ClassNotRegistered { name: name.to_owned() });
            }
            if forest::children(class).into_iter().any(|c| c != meta) {
                return Err(Error::ClassHasSubclasses { name: name.to_owned() });
            }

            if state.classes.get(name) == Some(&class) {
                state.classes.remove(name);
            }
            if state.reserved.get(name) == Some(&class) {
                state.reserved.remove(name);
            }
            state.descriptors.retain(|_, entry| entry.class != class);

            match class.superclass() {
                Some(superclass) => {
                    forest::unlink(superclass, class);
                    if let Some(super_meta) = superclass.metaclass() {
                        forest::unlink(super_meta, meta);
                    }
                }
                None => {
                    forest::unlink(class, meta);
                    state.roots.retain(|c| *c != class);
                }
            }

            let dead = ClassFlags::DISPOSED | ClassFlags::INERT;
            class.set_info(dead);
            meta.set_info(dead);
            self.cache_flush(class);
            self.cache_flush(meta);

            // Method-list scans hold the runtime lock shared, so none is
            // reading the overlays now. A lookup that loaded one of the old
            // cache tables keeps that table alive until it returns.
            release_metadata(class);
            release_metadata(meta);
        }

        debug!("disposed class {name}");
        Ok(())
    }
}

/// Drops a disposed class's method lists, ivars and protocols.
fn release_metadata(class: Class) {
    let mut rw = class.rw_mut();
    let ro = ClassRo::empty(rw.ro.name, rw.ro.flags);
    *rw = ClassRw::new(Arc::new(ro));
}

/// Log prefix for instance (`-`) or class (`+`) methods.
fn sign(class: Class) -> &'static str {
    if class.is_metaclass() { "+" } else { "-" }
}
