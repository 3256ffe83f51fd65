//! Read-only queries over classes and the class graph.
//!
//! The list accessors return snapshots; a class edited afterwards does not
//! change a list already returned.

use super::class::Class;
use super::ivar::Ivar;
use super::method::Method;
use super::protocol::{Property, Protocol};
use super::selector::Selector;
use super::{Runtime, forest};

impl Class {
    /// Methods the class itself defines, category methods first.
    ///
    /// A selector shadowed by a category appears once per list that
    /// defines it.
    #[must_use]
    pub fn method_list(self) -> Vec<Method> {
        self.rw().methods.iter().flat_map(|list| list.iter().copied()).collect()
    }

    /// Ivars the class itself declares, in declaration order.
    #[must_use]
    pub fn ivar_list(self) -> Vec<Ivar> {
        self.rw().ro.ivars.clone()
    }

    /// Looks an ivar up by name in the class and its superclasses.
    #[must_use]
    pub fn ivar(self, name: &str) -> Option<Ivar> {
        self.chain()
            .find_map(|c| c.rw().ro.ivars.iter().find(|i| i.name() == name).cloned())
    }

    #[must_use]
    pub fn property_list(self) -> Vec<Property> {
        self.rw().properties.clone()
    }

    /// Looks a property up by name in the class and its superclasses.
    #[must_use]
    pub fn property(self, name: &str) -> Option<Property> {
        self.chain()
            .find_map(|c| c.rw().properties.iter().find(|p| p.name() == name).copied())
    }

    /// Protocols the class itself adopts.
    #[must_use]
    pub fn protocol_list(self) -> Vec<Protocol> {
        self.rw().protocols.clone()
    }

    /// True if the class or a superclass adopts `protocol` or a protocol
    /// incorporating it.
    #[must_use]
    pub fn conforms_to(self, protocol: Protocol) -> bool {
        self.instance_class()
            .chain()
            .any(|c| c.rw().protocols.iter().any(|p| p.conforms_to(protocol)))
    }

    /// True if `other` is this class or one of its superclasses.
    #[must_use]
    pub fn is_subclass_of(self, other: Class) -> bool {
        self.chain().any(|c| c == other)
    }
}

impl Runtime {
    /// The realized or registered class with this name.
    #[must_use]
    pub fn class_named(&self, name: &str) -> Option<Class> {
        self.state.read().classes.get(name).copied()
    }

    /// Every realized or registered class, sorted by name.
    #[must_use]
    pub fn all_classes(&self) -> Vec<Class> {
        let mut classes: Vec<Class> = self.state.read().classes.values().copied().collect();
        classes.sort_unstable_by_key(|c| c.name());
        classes
    }

    /// Root classes, in the order they were realized.
    #[must_use]
    pub fn root_classes(&self) -> Vec<Class> {
        self.state.read().roots.clone()
    }

    #[must_use]
    pub fn protocol_named(&self, name: &str) -> Option<Protocol> {
        self.state.read().protocols.get(name).copied()
    }

    /// Direct subclasses of `class`, most recently linked first.
    ///
    /// A root class lists its metaclass among its subclasses.
    #[must_use]
    pub fn subclasses(&self, class: Class) -> Vec<Class> {
        let _state = self.state.read();
        forest::children(class)
    }

    /// Calls `f` for every class below `class`, depth first.
    ///
    /// The walk is a snapshot taken under the runtime lock; `f` runs with
    /// no lock held and may edit the runtime.
    pub fn for_each_subclass(&self, class: Class, mut f: impl FnMut(Class)) {
        let below = {
            let _state = self.state.read();
            forest::descendants(class)
        };
        for sub in below {
            f(sub);
        }
    }

    /// The instance method `class` would dispatch `sel` to, searching
    /// superclasses. Neither caches nor resolves.
    #[must_use]
    pub fn instance_method(&self, class: Class, sel: Selector) -> Option<Method> {
        let _state = self.state.read();
        class
            .instance_class()
            .chain()
            .find_map(|c| c.rw().find_method(sel).copied())
    }

    /// Like [`instance_method`](Self::instance_method), for class methods.
    #[must_use]
    pub fn class_method(&self, class: Class, sel: Selector) -> Option<Method> {
        let meta = class.instance_class().metaclass()?;
        let _state = self.state.read();
        meta.chain().find_map(|c| c.rw().find_method(sel).copied())
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;
    use std::sync::Arc;

    use super::*;
    use crate::RuntimeConfig;
    use crate::runtime::descriptor::{CategoryDescriptor, ClassDescriptor, ProtocolDescriptor};
    use crate::runtime::method::Imp;
    use crate::runtime::selector::SelectorHandle;

    unsafe extern "C" fn describe(_: *mut c_void, _: SelectorHandle, _: *const *mut u8, ret: *mut u8) {
        unsafe { ret.write(7) };
    }

    unsafe extern "C" fn make(_: *mut c_void, _: SelectorHandle, _: *const *mut u8, ret: *mut u8) {
        unsafe { ret.write(8) };
    }

    fn shapes(rt: &Runtime) -> (Class, Class, Class) {
        let shape = rt
            .realize(&Arc::new(
                ClassDescriptor::root("IntroShape")
                    .method("describe", "v@:", Imp::new(describe))
                    .class_method("make", "@#:", Imp::new(make))
                    .ivar("isa", "#", 0, 8, 3)
                    .property("area", "Td,R"),
            ))
            .unwrap();
        let circle = rt
            .realize(&Arc::new(
                ClassDescriptor::new("IntroCircle", "IntroShape")
                    .instance_start(8)
                    .ivar("radius", "d", 8, 8, 3),
            ))
            .unwrap();
        let square = rt
            .realize(&Arc::new(ClassDescriptor::new("IntroSquare", "IntroShape")))
            .unwrap();
        (shape, circle, square)
    }

    #[test]
    fn test_class_graph_queries() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (shape, circle, square) = shapes(rt);

        assert_eq!(rt.class_named("IntroCircle"), Some(circle));
        assert_eq!(rt.all_classes(), vec![circle, shape, square]);
        assert_eq!(rt.root_classes(), vec![shape]);

        let subs = rt.subclasses(shape);
        assert!(subs.contains(&circle) && subs.contains(&square));
        assert!(subs.contains(&shape.metaclass().unwrap()));

        let mut seen = Vec::new();
        rt.for_each_subclass(shape, |c| seen.push(c));
        // Circle, Square and the three metaclasses.
        assert_eq!(seen.len(), 5);

        assert!(circle.is_subclass_of(shape));
        assert!(!shape.is_subclass_of(circle));
    }

    #[test]
    fn test_member_queries() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (shape, circle, _) = shapes(rt);

        assert_eq!(circle.ivar_list().len(), 1);
        assert_eq!(circle.ivar("isa").map(|i| i.offset()), Some(0));
        assert_eq!(circle.ivar("radius").map(|i| i.offset()), Some(8));
        assert_eq!(circle.property("area").map(|p| p.attributes()), Some("Td,R"));
        assert!(circle.property_list().is_empty());

        let describe_sel = Selector::intern("describe");
        assert_eq!(shape.method_list().len(), 1);
        assert!(circle.method_list().is_empty());
        assert_eq!(
            rt.instance_method(circle, describe_sel).map(|m| m.imp()),
            Some(Imp::new(describe))
        );
        assert_eq!(
            rt.class_method(circle, Selector::intern("make")).map(|m| m.types()),
            Some("@#:")
        );
        // Root metaclasses inherit from the root class.
        assert_eq!(
            rt.class_method(circle, describe_sel).map(|m| m.imp()),
            Some(Imp::new(describe))
        );
    }

    #[test]
    fn test_conformance_through_superclass_and_category() {
        let rt = Runtime::new(RuntimeConfig::default());
        let coding = rt.register_protocol(&ProtocolDescriptor::new("IntroCoding")).unwrap();
        let secure = rt
            .register_protocol(&ProtocolDescriptor::new("IntroSecureCoding").inherits("IntroCoding"))
            .unwrap();
        let (shape, circle, _) = shapes(rt);

        assert!(!circle.conforms_to(coding));

        let archiving = CategoryDescriptor::new("Archiving", "IntroShape").protocol("IntroSecureCoding");
        rt.apply_category(shape, &archiving).unwrap();

        assert_eq!(shape.protocol_list(), vec![secure]);
        assert!(circle.conforms_to(coding));
        assert!(circle.conforms_to(secure));
        assert_eq!(rt.protocol_named("IntroCoding"), Some(coding));
    }
}
