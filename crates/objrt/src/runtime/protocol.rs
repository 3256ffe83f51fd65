//! Protocols and properties.

use std::fmt;

use super::selector::Selector;

/// A declared property: name plus attribute string (e.g. `"T@\"NSString\",C,N"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    name: &'static str,
    attributes: &'static str,
}

impl Property {
    pub(crate) fn new(name: &'static str, attributes: &'static str) -> Property {
        Property { name, attributes }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn attributes(&self) -> &'static str {
        self.attributes
    }
}

/// A method a protocol requires or offers, without an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescription {
    pub selector: Selector,
    pub types: &'static str,
}

pub(crate) struct ProtocolObject {
    pub(crate) name: &'static str,
    pub(crate) inherited: Vec<Protocol>,
    pub(crate) required_instance: Vec<MethodDescription>,
    pub(crate) optional_instance: Vec<MethodDescription>,
    pub(crate) required_class: Vec<MethodDescription>,
    pub(crate) optional_class: Vec<MethodDescription>,
    pub(crate) properties: Vec<Property>,
}

/// A registered protocol. Protocols are immutable once registered.
#[derive(Clone, Copy)]
pub struct Protocol(pub(crate) &'static ProtocolObject);

impl Protocol {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.0.name
    }

    /// Protocols this one directly incorporates.
    #[must_use]
    pub fn inherited(self) -> &'static [Protocol] {
        &self.0.inherited
    }

    /// True if this protocol is `other` or incorporates it, directly or
    /// through inherited protocols.
    #[must_use]
    pub fn conforms_to(self, other: Protocol) -> bool {
        self == other || self.0.inherited.iter().any(|p| p.conforms_to(other))
    }

    /// Method descriptions declared directly by this protocol.
    #[must_use]
    pub fn method_descriptions(self, required: bool, instance: bool) -> &'static [MethodDescription] {
        match (required, instance) {
            (true, true) => &self.0.required_instance,
            (false, true) => &self.0.optional_instance,
            (true, false) => &self.0.required_class,
            (false, false) => &self.0.optional_class,
        }
    }

    /// Looks a selector up in this protocol and the protocols it inherits.
    #[must_use]
    pub fn method_description(
        self,
        sel: Selector,
        required: bool,
        instance: bool,
    ) -> Option<MethodDescription> {
        self.method_descriptions(required, instance)
            .iter()
            .find(|m| m.selector == sel)
            .copied()
            .or_else(|| {
                self.0
                    .inherited
                    .iter()
                    .find_map(|p| p.method_description(sel, required, instance))
            })
    }

    #[must_use]
    pub fn properties(self) -> &'static [Property] {
        &self.0.properties
    }
}

impl PartialEq for Protocol {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Protocol {}

impl std::hash::Hash for Protocol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state);
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Protocol({})", self.0.name)
    }
}
