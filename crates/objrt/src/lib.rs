//! `objrt`: class metadata and message dispatch for a dynamic object runtime
//!
//! `objrt` is the dispatch substrate of a single-inheritance, selector-based
//! object model with categories. It provides:
//!
//! - **Selector interning** with O(1) identity comparison
//! - **Per-class method caches** that are read without locks
//! - **Class realization** from static descriptors, including classes whose
//!   superclass has not been loaded yet
//! - **Categories, dynamic classes and introspection**
//! - **Method resolution** through a resolver hook and a forwarding sentinel
//!
//! # Architecture
//!
//! - [`runtime::selector`]: process-wide selector registry
//! - [`runtime::cache`]: lock-free method cache with deferred reclamation
//! - [`runtime::class`]: realized class records and their mutable overlay
//! - [`runtime::realize`]: descriptor realization and image loading
//! - [`runtime::lookup`]: the cache → scan → resolve → forward algorithm
//!
//! # Example
//!
//! ```rust
//! use std::ffi::c_void;
//! use std::sync::Arc;
//!
//! use objrt::{ClassDescriptor, Imp, Runtime, RuntimeConfig, Selector, SelectorHandle};
//!
//! unsafe extern "C" fn hello(
//!     _receiver: *mut c_void,
//!     _cmd: SelectorHandle,
//!     _args: *const *mut u8,
//!     _ret: *mut u8,
//! ) {
//! }
//!
//! let rt = Runtime::new(RuntimeConfig::default());
//! let root = rt
//!     .realize(&Arc::new(ClassDescriptor::root("Object").method("hello", "v@:", Imp::new(hello))))
//!     .unwrap();
//!
//! let sel = Selector::intern("hello");
//! assert_eq!(rt.lookup(root, sel), Imp::new(hello));
//! assert!(rt.lookup(root, Selector::intern("missing")).is_forward());
//! ```

pub mod config;
pub mod error;
pub mod runtime;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use runtime::{
    CategoryDescriptor, Class, ClassDescriptor, ClassFlags, Image, Imp, Ivar,
    LoadReport, Method, Protocol, ProtocolDescriptor, Runtime, Selector,
    SelectorHandle, StatsSnapshot,
};
