//! Static class, category and protocol descriptors.
//!
//! Descriptors are what an image loader hands the runtime: plain owned data
//! with names instead of pointers. Realization turns them into live
//! [`Class`](super::Class) and [`Protocol`](super::Protocol) records.
//!
//! A descriptor's identity is its `Arc` allocation: realizing the same
//! `Arc<ClassDescriptor>` twice yields the same class.
//!
//! ```
//! use objrt::ClassDescriptor;
//!
//! let base = ClassDescriptor::root("Base")
//!     .instance_size(16)
//!     .ivar("isa", "#", 0, 8, 3)
//!     .ivar("count", "Q", 8, 8, 3);
//! let derived = ClassDescriptor::new("Derived", "Base").instance_start(16);
//!
//! assert!(base.superclass.is_none());
//! assert_eq!(derived.superclass.as_deref(), Some("Base"));
//! ```

use std::sync::Arc;

use super::class::RoFlags;
use super::method::Imp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub types: String,
    pub imp: Imp,
}

/// A method signature without implementation, as declared by a protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: String,
    pub types: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvarDescriptor {
    pub name: String,
    pub types: String,
    /// Offset as compiled; slid at realization if the superclass grew.
    pub offset: usize,
    pub size: usize,
    pub align_log2: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub attributes: String,
}

/// A class as authored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub name: String,
    /// Superclass name; `None` for a root class.
    pub superclass: Option<String>,
    pub flags: RoFlags,
    /// Offset of the first ivar this class adds.
    pub instance_start: usize,
    pub instance_size: usize,
    pub ivars: Vec<IvarDescriptor>,
    pub methods: Vec<MethodDescriptor>,
    pub class_methods: Vec<MethodDescriptor>,
    /// Names of adopted protocols.
    pub protocols: Vec<String>,
    pub properties: Vec<PropertyDescriptor>,
}

impl ClassDescriptor {
    /// A class inheriting from `superclass`.
    pub fn new(name: impl Into<String>, superclass: impl Into<String>) -> Self {
        Self::with_superclass(name.into(), Some(superclass.into()))
    }

    /// A root class.
    pub fn root(name: impl Into<String>) -> Self {
        let mut desc = Self::with_superclass(name.into(), None);
        desc.flags |= RoFlags::ROOT;
        desc
    }

    fn with_superclass(name: String, superclass: Option<String>) -> Self {
        ClassDescriptor {
            name,
            superclass,
            flags: RoFlags::empty(),
            instance_start: 0,
            instance_size: 0,
            ivars: Vec::new(),
            methods: Vec::new(),
            class_methods: Vec::new(),
            protocols: Vec::new(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn method(mut self, name: impl Into<String>, types: impl Into<String>, imp: Imp) -> Self {
        self.methods.push(MethodDescriptor { name: name.into(), types: types.into(), imp });
        self
    }

    #[must_use]
    pub fn class_method(
        mut self,
        name: impl Into<String>,
        types: impl Into<String>,
        imp: Imp,
    ) -> Self {
        self.class_methods.push(MethodDescriptor { name: name.into(), types: types.into(), imp });
        self
    }

    /// Adds an ivar and grows `instance_size` to cover it.
    #[must_use]
    pub fn ivar(
        mut self,
        name: impl Into<String>,
        types: impl Into<String>,
        offset: usize,
        size: usize,
        align_log2: u8,
    ) -> Self {
        self.instance_size = self.instance_size.max(offset + size);
        self.ivars.push(IvarDescriptor {
            name: name.into(),
            types: types.into(),
            offset,
            size,
            align_log2,
        });
        self
    }

    #[must_use]
    pub fn instance_start(mut self, start: usize) -> Self {
        self.instance_start = start;
        self.instance_size = self.instance_size.max(start);
        self
    }

    #[must_use]
    pub fn instance_size(mut self, size: usize) -> Self {
        self.instance_size = size;
        self
    }

    #[must_use]
    pub fn protocol(mut self, name: impl Into<String>) -> Self {
        self.protocols.push(name.into());
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, attributes: impl Into<String>) -> Self {
        self.properties.push(PropertyDescriptor { name: name.into(), attributes: attributes.into() });
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: RoFlags) -> Self {
        self.flags |= flags;
        self
    }
}

/// Methods, protocols and properties added to an existing class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDescriptor {
    pub name: String,
    /// Name of the class the category extends.
    pub class_name: String,
    pub instance_methods: Vec<MethodDescriptor>,
    pub class_methods: Vec<MethodDescriptor>,
    pub protocols: Vec<String>,
    pub properties: Vec<PropertyDescriptor>,
}

impl CategoryDescriptor {
    pub fn new(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        CategoryDescriptor {
            name: name.into(),
            class_name: class_name.into(),
            instance_methods: Vec::new(),
            class_methods: Vec::new(),
            protocols: Vec::new(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn method(mut self, name: impl Into<String>, types: impl Into<String>, imp: Imp) -> Self {
        self.instance_methods.push(MethodDescriptor { name: name.into(), types: types.into(), imp });
        self
    }

    #[must_use]
    pub fn class_method(
        mut self,
        name: impl Into<String>,
        types: impl Into<String>,
        imp: Imp,
    ) -> Self {
        self.class_methods.push(MethodDescriptor { name: name.into(), types: types.into(), imp });
        self
    }

    #[must_use]
    pub fn protocol(mut self, name: impl Into<String>) -> Self {
        self.protocols.push(name.into());
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, attributes: impl Into<String>) -> Self {
        self.properties.push(PropertyDescriptor { name: name.into(), attributes: attributes.into() });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    pub name: String,
    /// Names of incorporated protocols.
    pub protocols: Vec<String>,
    pub required_instance_methods: Vec<MethodSignature>,
    pub optional_instance_methods: Vec<MethodSignature>,
    pub required_class_methods: Vec<MethodSignature>,
    pub optional_class_methods: Vec<MethodSignature>,
    pub properties: Vec<PropertyDescriptor>,
}

impl ProtocolDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        ProtocolDescriptor {
            name: name.into(),
            protocols: Vec::new(),
            required_instance_methods: Vec::new(),
            optional_instance_methods: Vec::new(),
            required_class_methods: Vec::new(),
            optional_class_methods: Vec::new(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn inherits(mut self, name: impl Into<String>) -> Self {
        self.protocols.push(name.into());
        self
    }

    /// Declares an instance method.
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, types: impl Into<String>, required: bool) -> Self {
        let sig = MethodSignature { name: name.into(), types: types.into() };
        if required {
            self.required_instance_methods.push(sig);
        } else {
            self.optional_instance_methods.push(sig);
        }
        self
    }

    /// Declares a class method.
    #[must_use]
    pub fn class_method(
        mut self,
        name: impl Into<String>,
        types: impl Into<String>,
        required: bool,
    ) -> Self {
        let sig = MethodSignature { name: name.into(), types: types.into() };
        if required {
            self.required_class_methods.push(sig);
        } else {
            self.optional_class_methods.push(sig);
        }
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, attributes: impl Into<String>) -> Self {
        self.properties.push(PropertyDescriptor { name: name.into(), attributes: attributes.into() });
        self
    }
}

/// Everything one loaded image contributes.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub classes: Vec<Arc<ClassDescriptor>>,
    pub categories: Vec<Arc<CategoryDescriptor>>,
    pub protocols: Vec<Arc<ProtocolDescriptor>>,
}

impl Image {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn class(mut self, desc: ClassDescriptor) -> Self {
        self.classes.push(Arc::new(desc));
        self
    }

    #[must_use]
    pub fn category(mut self, desc: CategoryDescriptor) -> Self {
        self.categories.push(Arc::new(desc));
        self
    }

    #[must_use]
    pub fn protocol(mut self, desc: ProtocolDescriptor) -> Self {
        self.protocols.push(Arc::new(desc));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_sets_flag() {
        let desc = ClassDescriptor::root("Root");
        assert!(desc.flags.contains(RoFlags::ROOT));
        assert!(desc.superclass.is_none());
    }

    #[test]
    fn test_ivar_grows_instance_size() {
        let desc = ClassDescriptor::root("Point")
            .ivar("x", "d", 8, 8, 3)
            .ivar("y", "d", 16, 8, 3);
        assert_eq!(desc.instance_size, 24);
        assert_eq!(desc.ivars.len(), 2);
    }

    #[test]
    fn test_protocol_method_kinds() {
        let desc = ProtocolDescriptor::new("Copying")
            .method("copy", "@@:", true)
            .method("zone", "^v@:", false)
            .class_method("copyClass", "#@:", true);

        assert_eq!(desc.required_instance_methods.len(), 1);
        assert_eq!(desc.optional_instance_methods.len(), 1);
        assert_eq!(desc.required_class_methods.len(), 1);
    }
}
