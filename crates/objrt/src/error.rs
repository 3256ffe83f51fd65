//! Error types for the `objrt` runtime.
//!
//! Configuration problems (duplicate definitions, malformed hierarchies,
//! misuse of the construction API) are reported as [`Error`]; the offending
//! item is dropped and the runtime continues. A dispatch miss is never an
//! error: it yields [`Imp::FORWARD`](crate::Imp::FORWARD). Resource
//! exhaustion is fatal and aborts the process.

use std::fmt;

/// Errors reported by the `objrt` runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A class with this name is already known to the runtime.
    ClassAlreadyExists {
        /// The contested class name.
        name: String,
    },

    /// The superclass chain of the class leads back to itself.
    InheritanceCycle {
        /// The class that closed the cycle.
        name: String,
    },

    /// The superclass has not been loaded; the class is parked until it is.
    UnresolvedSuperclass {
        /// The parked class.
        class: String,
        /// The missing superclass name.
        superclass: String,
    },

    /// A category with this name was already applied to the class.
    CategoryAlreadyExists {
        /// The target class.
        class: String,
        /// The category name.
        category: String,
    },

    /// A protocol with this name is already registered.
    ProtocolAlreadyExists {
        /// The protocol name.
        name: String,
    },

    /// The class already adopts the protocol.
    ProtocolAlreadyAdopted {
        /// The adopting class.
        class: String,
        /// The protocol name.
        protocol: String,
    },

    /// The class or one of its superclasses already has an ivar with this name.
    DuplicateIvar {
        /// The class being constructed.
        class: String,
        /// The ivar name.
        ivar: String,
    },

    /// Ivars can only be added to instance classes.
    IvarOnMetaclass {
        /// The metaclass name.
        class: String,
    },

    /// The ivar alignment is not representable.
    InvalidAlignment {
        /// The requested alignment, as a power of two.
        align_log2: u8,
    },

    /// The operation requires a class that is still under construction.
    ClassNotConstructing {
        /// The class name.
        name: String,
    },

    /// The class itself already defines the selector.
    MethodAlreadyExists {
        /// The class name.
        class: String,
        /// The selector name.
        selector: String,
    },

    /// The class already declares a property with this name.
    PropertyAlreadyExists {
        /// The class name.
        class: String,
        /// The property name.
        property: String,
    },

    /// The class still has subclasses and cannot be disposed.
    ClassHasSubclasses {
        /// The class name.
        name: String,
    },

    /// The class is not registered (still constructing, parked, inert or
    /// disposed) and cannot be used for this operation.
    ClassNotRegistered {
        /// The class name.
        name: String,
    },

    /// A non-blocking accessor found the runtime lock held.
    WouldBlock,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClassAlreadyExists { name } => {
                write!(f, "Class '{name}' already exists")
            }
            Error::InheritanceCycle { name } => {
                write!(f, "Inheritance cycle detected at class '{name}'")
            }
            Error::UnresolvedSuperclass { class, superclass } => {
                write!(
                    f,
                    "Class '{class}' is waiting for missing superclass '{superclass}'"
                )
            }
            Error::CategoryAlreadyExists { class, category } => {
                write!(f, "Category '{class}({category})' was already applied")
            }
            Error::ProtocolAlreadyExists { name } => {
                write!(f, "Protocol '{name}' already exists")
            }
            Error::ProtocolAlreadyAdopted { class, protocol } => {
                write!(f, "Class '{class}' already adopts protocol '{protocol}'")
            }
            Error::DuplicateIvar { class, ivar } => {
                write!(f, "Class '{class}' already has an ivar named '{ivar}'")
            }
            Error::IvarOnMetaclass { class } => {
                write!(f, "Cannot add an ivar to metaclass '{class}'")
            }
            Error::InvalidAlignment { align_log2 } => {
                write!(f, "Invalid ivar alignment: 2^{align_log2}")
            }
            Error::ClassNotConstructing { name } => {
                write!(f, "Class '{name}' is not under construction")
            }
            Error::MethodAlreadyExists { class, selector } => {
                write!(f, "Class '{class}' already defines '{selector}'")
            }
            Error::PropertyAlreadyExists { class, property } => {
                write!(f, "Class '{class}' already has a property named '{property}'")
            }
            Error::ClassHasSubclasses { name } => {
                write!(f, "Class '{name}' still has subclasses")
            }
            Error::ClassNotRegistered { name } => {
                write!(f, "Class '{name}' is not registered")
            }
            Error::WouldBlock => {
                write!(f, "Runtime lock is held by another thread")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for `objrt` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Logs a diagnostic and aborts the process.
///
/// Used for allocation failures inside the runtime, which leave no state
/// worth unwinding to.
#[cold]
#[inline(never)]
pub(crate) fn fatal(args: fmt::Arguments<'_>) -> ! {
    objrt_log::error!("objrt fatal: {args}");

    #[cfg(feature = "fatal_backtrace")]
    {
        let trace = backtrace::Backtrace::new();
        objrt_log::error!("{trace:?}");
    }

    std::process::abort()
}
