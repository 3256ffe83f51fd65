//! Realization: turning descriptors into linked classes.
//!
//! Realizing a [`ClassDescriptor`] resolves its superclass by name, builds
//! the read-only data and the overlay, creates and links the metaclass,
//! inserts both into the subclass forest and attaches categories that were
//! waiting for the class.
//!
//! A class whose superclass is not known yet is parked in the `FUTURE`
//! state. It keeps its handle and is completed in place as soon as a class
//! with the superclass's name is realized or registered. Until then it
//! forwards every message.
//!
//! # Descriptor identity
//!
//! Realization is idempotent per descriptor, not per name. The runtime keeps
//! every descriptor it has realized (or parked, or rejected) keyed by its
//! `Arc` address, together with a strong reference so the address cannot be
//! handed to a different descriptor later. A second descriptor with a name
//! that is already taken is rejected with [`Error::ClassAlreadyExists`].
//!
//! # Ivar sliding
//!
//! A descriptor records ivar offsets as they were when it was written. If
//! the superclass's instance size has grown since, every ivar of the new
//! class moves up by the difference, rounded to the largest ivar alignment,
//! and `instance_start`/`instance_size` follow.
//!
//! # Cycles
//!
//! A class whose superclass chain, followed through parked classes, leads
//! back to itself is an inheritance cycle. The closing class and every
//! parked class on the cycle are marked `INERT`: they keep their handles but
//! never dispatch and never complete.
//!
//! # Images
//!
//! [`Runtime::load_image`] realizes a batch under one exclusive hold of the
//! runtime lock: protocols, then classes in the order given, then
//! categories. Failures are collected in the [`LoadReport`] rather than
//! stopping the load.

use std::sync::Arc;

use objrt_log::{debug, info, warn};

use super::class::{Class, ClassFlags, ClassObject, ClassRo, ClassRw, RoFlags};
use super::descriptor::{
    ClassDescriptor, Image, MethodDescriptor, MethodSignature, PropertyDescriptor,
    ProtocolDescriptor,
};
use super::ivar::{self, Ivar};
use super::method::{Method, MethodList};
use super::protocol::{MethodDescription, Property, Protocol, ProtocolObject};
use super::selector::Selector;
use super::{DescribedClass, FutureClass, Runtime, RuntimeState, forest};
use crate::error::{Error, Result, fatal};

/// What [`Runtime::load_image`] did with an image.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Protocols registered, in image order.
    pub protocols: Vec<Protocol>,
    /// Classes realized and ready for dispatch.
    pub classes: Vec<Class>,
    /// Classes parked until their superclass is loaded.
    pub parked: Vec<Class>,
    /// Categories attached to an already realized class.
    pub categories_attached: usize,
    /// Categories waiting for their class to be loaded.
    pub categories_parked: usize,
    /// Everything that was rejected or left unresolved.
    pub errors: Vec<Error>,
}

impl LoadReport {
    /// True if every item in the image was loaded and linked.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Identity of a descriptor. Only meaningful while the runtime holds a
/// strong reference to it.
fn descriptor_key(desc: &Arc<ClassDescriptor>) -> usize {
    Arc::as_ptr(desc).addr()
}

impl RuntimeState {
    /// Records the class built from `desc`, keeping `desc` alive so no other
    /// descriptor can be allocated at its address.
    fn remember(&mut self, desc: &Arc<ClassDescriptor>, class: Class) {
        self.descriptors.insert(
            descriptor_key(desc),
            DescribedClass { descriptor: Arc::clone(desc), class },
        );
    }

    /// The class already built from `desc`, if any.
    fn described(&self, desc: &Arc<ClassDescriptor>) -> Option<Class> {
        self.descriptors
            .get(&descriptor_key(desc))
            .filter(|entry| Arc::ptr_eq(&entry.descriptor, desc))
            .map(|entry| entry.class)
    }
}

impl Runtime {
    /// Realizes a class descriptor.
    ///
    /// Realizing the same descriptor again returns the same class. If the
    /// superclass is unknown the class is returned parked in the `FUTURE`
    /// state and completes automatically once the superclass appears.
    ///
    /// # Errors
    ///
    /// - [`Error::ClassAlreadyExists`] if another descriptor already
    ///   claimed the name
    /// - [`Error::InheritanceCycle`] if the superclass chain leads back to
    ///   this class
    pub fn realize(&self, desc: &Arc<ClassDescriptor>) -> Result<Class> {
        let mut state = self.state.write();
        self.realize_locked(&mut state, desc)
    }

    /// Registers a protocol.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolAlreadyExists`] if the name is taken.
    pub fn register_protocol(&self, desc: &ProtocolDescriptor) -> Result<Protocol> {
        let mut state = self.state.write();
        self.register_protocol_locked(&mut state, desc)
    }

    /// Loads an image: protocols first, then classes in order, then
    /// categories.
    ///
    /// A failing item is logged and recorded in the report; the rest of the
    /// image still loads.
    pub fn load_image(&self, image: &Image) -> LoadReport {
        let mut state = self.state.write();
        let mut report = LoadReport::default();

        for desc in &image.protocols {
            match self.register_protocol_locked(&mut state, desc) {
                Ok(protocol) => report.protocols.push(protocol),
                Err(e) => report.errors.push(e),
            }
        }

        let mut loaded = Vec::with_capacity(image.classes.len());
        for desc in &image.classes {
            match self.realize_locked(&mut state, desc) {
                Ok(class) => loaded.push((class, desc)),
                Err(e) => report.errors.push(e),
            }
        }

        // Later classes in the image may have completed earlier ones.
        for (class, desc) in loaded {
            if class.flags().contains(ClassFlags::FUTURE) {
                report.parked.push(class);
                report.errors.push(Error::UnresolvedSuperclass {
                    class: desc.name.clone(),
                    superclass: desc.superclass.clone().unwrap_or_default(),
                });
            } else {
                report.classes.push(class);
            }
        }

        for category in &image.categories {
            match self.load_category_locked(&mut state, category) {
                Ok(true) => report.categories_attached += 1,
                Ok(false) => report.categories_parked += 1,
                Err(e) => report.errors.push(e),
            }
        }

        debug!(
            "loaded image: {} protocols, {} classes ({} parked), {} categories, {} errors",
            report.protocols.len(),
            report.classes.len(),
            report.parked.len(),
            report.categories_attached,
            report.errors.len()
        );

        report
    }

    /// [`Runtime::realize`] with the runtime lock already held exclusively.
    ///
    /// Returns the existing class for a known descriptor, rejects a taken
    /// name, detects cycles, parks the class if its superclass is missing
    /// and otherwise completes it immediately.
    pub(crate) fn realize_locked(
        &self,
        state: &mut RuntimeState,
        desc: &Arc<ClassDescriptor>,
    ) -> Result<Class> {
        if let Some(class) = state.described(desc) {
            if class.flags().contains(ClassFlags::INERT) {
                return Err(Error::InheritanceCycle { name: desc.name.clone() });
            }
            return Ok(class);
        }

        if state.name_taken(&desc.name) {
            warn!("class '{}' already exists; ignoring the duplicate definition", desc.name);
            return Err(Error::ClassAlreadyExists { name: desc.name.clone() });
        }

        let superclass = match desc.superclass.as_deref() {
            None => None,
            Some(name) if name == desc.name => return Err(self.reject_cycle(state, desc)),
            Some(name) => match state.classes.get(name).copied() {
                Some(superclass) => Some(superclass),
                None if Self::parked_chain_reaches(state, name, &desc.name) => {
                    return Err(self.reject_cycle(state, desc));
                }
                None => return Ok(self.park(state, desc, name)),
            },
        };

        let name = self.copy_str(&desc.name);
        let class = self.alloc_class(ClassObject::new(
            name,
            ClassFlags::empty(),
            ClassRo::empty(name, desc.flags),
        ));
        self.complete(state, class, desc, superclass);
        Ok(class)
    }

    /// True if following parked classes up from `start` reaches `target`.
    fn parked_chain_reaches(state: &RuntimeState, start: &str, target: &str) -> bool {
        let mut cursor = start;
        for _ in 0..=state.future.len() {
            let Some(parked) = state.future.get(cursor) else {
                return false;
            };
            if parked.superclass == target {
                return true;
            }
            cursor = &parked.superclass;
        }
        false
    }

    /// Marks the closing class and every parked class on the cycle inert.
    fn reject_cycle(&self, state: &mut RuntimeState, desc: &Arc<ClassDescriptor>) -> Error {
        warn!("class '{}' is part of an inheritance cycle; marking it inert", desc.name);

        let name = self.copy_str(&desc.name);
        let class = self.alloc_class(ClassObject::new(
            name,
            ClassFlags::INERT,
            ClassRo::empty(name, desc.flags),
        ));
        state.remember(desc, class);

        let mut cursor = desc.superclass.clone();
        while let Some(current) = cursor.take() {
            if current == desc.name {
                break;
            }
            if let Some(parked) = state.future.get(current.as_str()) {
                if parked.class.flags().contains(ClassFlags::INERT) {
                    break;
                }
                parked.class.set_info(ClassFlags::INERT);
                cursor = Some(parked.superclass.clone());
            }
        }

        Error::InheritanceCycle { name: desc.name.clone() }
    }

    /// Allocates `desc`'s class in the `FUTURE` state and files it under
    /// `superclass` so `resume_waiting` can find it.
    fn park(&self, state: &mut RuntimeState, desc: &Arc<ClassDescriptor>, superclass: &str) -> Class {
        let name = self.copy_str(&desc.name);
        let class = self.alloc_class(ClassObject::new(
            name,
            ClassFlags::FUTURE,
            ClassRo::empty(name, desc.flags),
        ));

        state.future.insert(
            name,
            FutureClass {
                class,
                descriptor: Arc::clone(desc),
                superclass: superclass.to_owned(),
            },
        );
        state.waiting.entry(superclass.to_owned()).or_default().push(name);
        state.remember(desc, class);

        debug!("class '{name}' parked until '{superclass}' is loaded");
        class
    }

    /// Builds and links `class` from `desc` under `superclass`.
    ///
    /// Used both for a fresh class and for a parked one, which keeps its
    /// handle and its per-class resolver. In order this:
    ///
    /// 1. copies ivars and slides them past the superclass's instance size
    /// 2. builds the read-only data for the class and its metaclass
    /// 3. replaces the overlay and links both into the isa graph and forest
    /// 4. flips `FUTURE` to `REALIZED` and publishes the name
    /// 5. attaches categories waiting for the class, then completes classes
    ///    that were parked on it
    fn complete(
        &self,
        state: &mut RuntimeState,
        class: Class,
        desc: &Arc<ClassDescriptor>,
        superclass: Option<Class>,
    ) {
        let name = class.name();
        let setup = self.config().print_class_setup;

        let mut ivars: Vec<Ivar> = desc
            .ivars
            .iter()
            .map(|i| {
                Ivar::new(
                    self.copy_str(&i.name),
                    self.copy_str(&i.types),
                    i.offset,
                    i.size,
                    i.align_log2,
                )
            })
            .collect();

        let mut instance_start = desc.instance_start;
        let mut instance_size = desc.instance_size;
        if let Some(superclass) = superclass {
            let super_size = superclass.rw().ro.instance_size;
            let delta = ivar::slide(&mut ivars, instance_start, super_size);
            if delta > 0 {
                instance_start += delta;
                instance_size += delta;
                if setup {
                    info!("IVARS: sliding ivars for class {name} by {delta} bytes");
                }
            }
        }

        let mut flags = desc.flags;
        if superclass.is_none() {
            flags |= RoFlags::ROOT;
        }

        let ro = ClassRo {
            flags,
            instance_start,
            instance_size,
            name,
            base_methods: self.base_list(name, &desc.methods),
            base_protocols: self.protocols_named(state, name, &desc.protocols),
            ivars,
            base_properties: self.properties(&desc.properties),
        };

        let meta_ro = ClassRo {
            base_methods: self.base_list(name, &desc.class_methods),
            ..ClassRo::empty(name, (flags | RoFlags::META) - RoFlags::ROOT)
        };
        let meta = self.alloc_class(ClassObject::new(
            name,
            ClassFlags::META | ClassFlags::REALIZED,
            meta_ro,
        ));

        let resolver = class.rw().resolver;
        {
            let mut rw = class.rw_mut();
            *rw = ClassRw::new(Arc::new(ro));
            rw.resolver = resolver;
        }
        link_class(state, class, meta, superclass);
        let root = if superclass.is_none() { ClassFlags::ROOT } else { ClassFlags::empty() };
        class.change_info(ClassFlags::REALIZED | root, ClassFlags::FUTURE);

        state.classes.insert(name, class);
        state.remember(desc, class);

        if setup {
            info!(
                "REALIZE: class {name} {:p} (meta {:p}) superclass {}",
                class.as_ptr(),
                meta.as_ptr(),
                superclass.map_or("(root)", Class::name)
            );
        } else {
            debug!("realized class {name}");
        }

        self.attach_waiting_categories(state, class);
        self.resume_waiting(state, name);
    }

    /// Completes classes that were parked on `name`.
    pub(crate) fn resume_waiting(&self, state: &mut RuntimeState, name: &str) {
        let Some(&superclass) = state.classes.get(name) else {
            return;
        };
        let Some(children) = state.waiting.remove(name) else {
            return;
        };

        for child in children {
            let Some(parked) = state.future.remove(child) else {
                continue;
            };
            if parked.class.flags().contains(ClassFlags::INERT) {
                continue;
            }
            debug!("resuming class '{child}' now that '{name}' is loaded");
            self.complete(state, parked.class, &parked.descriptor, Some(superclass));
        }
    }

    /// [`Runtime::register_protocol`] with the runtime lock held
    /// exclusively. Inherited protocols that are not registered yet are
    /// dropped with a warning.
    pub(crate) fn register_protocol_locked(
        &self,
        state: &mut RuntimeState,
        desc: &ProtocolDescriptor,
    ) -> Result<Protocol> {
        if state.protocols.contains_key(desc.name.as_str()) {
            warn!("protocol '{}' already exists; ignoring the duplicate", desc.name);
            return Err(Error::ProtocolAlreadyExists { name: desc.name.clone() });
        }

        let name = self.copy_str(&desc.name);
        let signatures = |list: &[MethodSignature]| -> Vec<MethodDescription> {
            list.iter()
                .map(|sig| MethodDescription {
                    selector: Selector::intern(&sig.name),
                    types: self.copy_str(&sig.types),
                })
                .collect()
        };

        let protocol = self.alloc_protocol(ProtocolObject {
            name,
            inherited: self.protocols_named(state, name, &desc.protocols),
            required_instance: signatures(&desc.required_instance_methods),
            optional_instance: signatures(&desc.optional_instance_methods),
            required_class: signatures(&desc.required_class_methods),
            optional_class: signatures(&desc.optional_class_methods),
            properties: self.properties(&desc.properties),
        });

        state.protocols.insert(name, protocol);
        debug!("registered protocol {name}");
        Ok(protocol)
    }

    /// Builds a fixed-up method list from descriptors.
    pub(crate) fn method_list(&self, owner: &str, methods: &[MethodDescriptor]) -> MethodList {
        MethodList::fixed_up(
            owner,
            methods
                .iter()
                .map(|m| Method::new(Selector::intern(&m.name), self.copy_str(&m.types), m.imp))
                .collect(),
        )
    }

    /// `None` for an empty descriptor list so the overlay holds no empty
    /// method lists.
    fn base_list(&self, owner: &str, methods: &[MethodDescriptor]) -> Option<Arc<MethodList>> {
        (!methods.is_empty()).then(|| Arc::new(self.method_list(owner, methods)))
    }

    pub(crate) fn properties(&self, properties: &[PropertyDescriptor]) -> Vec<Property> {
        properties
            .iter()
            .map(|p| Property::new(self.copy_str(&p.name), self.copy_str(&p.attributes)))
            .collect()
    }
}

/// Wires `class` and its metaclass into the isa graph and the subclass
/// forest.
///
/// A root metaclass is its own isa and inherits from its root class; every
/// other metaclass has the root metaclass as isa and inherits from the
/// superclass's metaclass.
pub(crate) fn link_class(state: &mut RuntimeState, class: Class, meta: Class, superclass: Option<Class>) {
    meta.set_instance_class(class);
    class.set_isa(meta);
    class.set_superclass(superclass);

    match superclass {
        Some(superclass) => {
            let super_meta = metaclass_of(superclass);
            meta.set_isa(super_meta.metaclass().unwrap_or(super_meta));
            meta.set_superclass(Some(super_meta));
            forest::link(superclass, class);
            forest::link(super_meta, meta);
        }
        None => {
            meta.set_isa(meta);
            meta.set_superclass(Some(class));
            forest::link(class, meta);
            state.roots.push(class);
        }
    }
}

/// Metaclass of a realized class.
fn metaclass_of(class: Class) -> Class {
    class.metaclass().unwrap_or_else(|| {
        fatal(format_args!("realized class '{}' has no metaclass", class.name()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use crate::runtime::descriptor::CategoryDescriptor;

    #[test]
    fn test_realize_is_idempotent() {
        let rt = Runtime::new(RuntimeConfig::default());
        let desc = Arc::new(ClassDescriptor::root("Idem"));

        let a = rt.realize(&desc).unwrap();
        let b = rt.realize(&desc).unwrap();

        assert_eq!(a, b);
        assert_eq!(rt.state.read().roots.len(), 1);
        assert_eq!(rt.subclasses(a).len(), 1);
    }

    #[test]
    fn test_temporary_descriptors_are_distinct() {
        let rt = Runtime::new(RuntimeConfig::default());

        // Each descriptor is dropped before the next one is allocated.
        let first = rt.realize(&Arc::new(ClassDescriptor::root("TempFirst"))).unwrap();
        let second = rt.realize(&Arc::new(ClassDescriptor::root("TempSecond"))).unwrap();

        assert_ne!(first, second);
        assert_eq!(second.name(), "TempSecond");
        assert_eq!(rt.class_named("TempFirst"), Some(first));
        assert_eq!(rt.class_named("TempSecond"), Some(second));

        for _ in 0..16 {
            let err = rt.realize(&Arc::new(ClassDescriptor::root("TempFirst"))).unwrap_err();
            assert_eq!(err, Error::ClassAlreadyExists { name: "TempFirst".into() });
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let rt = Runtime::new(RuntimeConfig::default());
        let first = rt.realize(&Arc::new(ClassDescriptor::root("Dup"))).unwrap();

        let err = rt.realize(&Arc::new(ClassDescriptor::root("Dup"))).unwrap_err();
        assert_eq!(err, Error::ClassAlreadyExists { name: "Dup".into() });
        assert_eq!(rt.class_named("Dup"), Some(first));
    }

    #[test]
    fn test_metaclass_shape() {
        let rt = Runtime::new(RuntimeConfig::default());
        let root = rt.realize(&Arc::new(ClassDescriptor::root("Root"))).unwrap();
        let leaf = rt.realize(&Arc::new(ClassDescriptor::new("Leaf", "Root"))).unwrap();

        let root_meta = root.metaclass().unwrap();
        let leaf_meta = leaf.metaclass().unwrap();

        assert_eq!(root_meta.metaclass(), Some(root_meta));
        assert_eq!(root_meta.superclass(), Some(root));
        assert_eq!(leaf_meta.metaclass(), Some(root_meta));
        assert_eq!(leaf_meta.superclass(), Some(root_meta));
        assert_eq!(leaf_meta.instance_class(), leaf);
        assert!(leaf_meta.is_metaclass());
    }

    #[test]
    fn test_future_class_resumes() {
        let rt = Runtime::new(RuntimeConfig::default());
        let child = rt.realize(&Arc::new(ClassDescriptor::new("Child", "Parent"))).unwrap();
        assert!(child.flags().contains(ClassFlags::FUTURE));
        assert!(rt.class_named("Child").is_none());

        let parent = rt.realize(&Arc::new(ClassDescriptor::root("Parent"))).unwrap();

        assert!(child.flags().contains(ClassFlags::REALIZED));
        assert!(!child.flags().contains(ClassFlags::FUTURE));
        assert_eq!(child.superclass(), Some(parent));
        assert_eq!(rt.class_named("Child"), Some(child));
    }

    #[test]
    fn test_cycle_rejected_and_inert() {
        let rt = Runtime::new(RuntimeConfig::default());
        let a = rt.realize(&Arc::new(ClassDescriptor::new("CycA", "CycB"))).unwrap();

        let err = rt.realize(&Arc::new(ClassDescriptor::new("CycB", "CycA"))).unwrap_err();
        assert_eq!(err, Error::InheritanceCycle { name: "CycB".into() });
        assert!(a.flags().contains(ClassFlags::INERT));

        let err = rt.realize(&Arc::new(ClassDescriptor::new("Selfish", "Selfish"))).unwrap_err();
        assert_eq!(err, Error::InheritanceCycle { name: "Selfish".into() });
    }

    #[test]
    fn test_ivars_slide_past_grown_superclass() {
        let rt = Runtime::new(RuntimeConfig::default());
        rt.realize(&Arc::new(
            ClassDescriptor::root("Grown").ivar("isa", "#", 0, 8, 3).ivar("extra", "Q", 8, 8, 3),
        ))
        .unwrap();

        // Compiled against an 8-byte superclass.
        let sub = rt
            .realize(&Arc::new(
                ClassDescriptor::new("Slid", "Grown")
                    .instance_start(8)
                    .ivar("value", "i", 8, 4, 2),
            ))
            .unwrap();

        let ivar = sub.ivar("value").unwrap();
        assert_eq!(ivar.offset(), 16);
        assert_eq!(sub.instance_size(), 24);
    }

    #[test]
    fn test_load_image_reports() {
        let rt = Runtime::new(RuntimeConfig::default());
        let image = Image::new()
            .protocol(ProtocolDescriptor::new("Proto"))
            .class(ClassDescriptor::new("Late", "Early"))
            .class(ClassDescriptor::root("Early").protocol("Proto"))
            .class(ClassDescriptor::new("Orphan", "Missing"))
            .class(ClassDescriptor::root("Early"))
            .category(CategoryDescriptor::new("Extras", "Early"))
            .category(CategoryDescriptor::new("Pending", "Unloaded"));

        let report = rt.load_image(&image);

        assert_eq!(report.protocols.len(), 1);
        assert_eq!(report.classes.len(), 2);
        assert_eq!(report.parked.len(), 1);
        assert_eq!(report.categories_attached, 1);
        assert_eq!(report.categories_parked, 1);
        assert!(report.errors.contains(&Error::ClassAlreadyExists { name: "Early".into() }));
        assert!(report.errors.contains(&Error::UnresolvedSuperclass {
            class: "Orphan".into(),
            superclass: "Missing".into(),
        }));
        assert!(!report.is_clean());
    }
}
