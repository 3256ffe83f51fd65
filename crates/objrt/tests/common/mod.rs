// Shared fixtures for the integration tests.
//
// Every implementation here writes a distinct marker byte to the return
// slot, so a test can tell which one a lookup picked by calling it.

#![allow(dead_code)]

use std::ffi::c_void;
use std::sync::Arc;

use objrt::runtime::RawImp;
use objrt::{Class, ClassDescriptor, Imp, Runtime, RuntimeConfig, Selector, SelectorHandle};

macro_rules! marker_imps {
    ($($name:ident = $value:literal),* $(,)?) => {
        $(
            /// Writes its marker to `ret` when `ret` is non-null.
            ///
            /// # Safety
            ///
            /// `ret` must be null or point at one writable byte.
            pub unsafe extern "C" fn $name(
                _receiver: *mut c_void,
                _cmd: SelectorHandle,
                _args: *const *mut u8,
                ret: *mut u8,
            ) {
                if !ret.is_null() {
                    unsafe { ret.write($value) };
                }
            }
        )*

        /// Every marker implementation, indexed by its marker.
        pub const MARKERS: &[RawImp] = &[$($name),*];
    };
}

marker_imps! {
    marker_0 = 0, marker_1 = 1, marker_2 = 2, marker_3 = 3,
    marker_4 = 4, marker_5 = 5, marker_6 = 6, marker_7 = 7,
    marker_8 = 8, marker_9 = 9, marker_10 = 10, marker_11 = 11,
    marker_12 = 12, marker_13 = 13, marker_14 = 14, marker_15 = 15,
}

pub const BASE: u8 = 1;
pub const DERIVED: u8 = 2;

/// The marker implementation for `value`.
pub fn marker(value: u8) -> Imp {
    Imp::new(MARKERS[usize::from(value)])
}

/// Calls `imp` and returns the marker it wrote.
pub fn call_marker(imp: Imp, sel: Selector) -> u8 {
    let mut out = u8::MAX;
    // SAFETY: marker implementations ignore the receiver and arguments and
    // write one byte to `ret`.
    unsafe { imp.call(std::ptr::null_mut(), sel, std::ptr::null(), &mut out) };
    out
}

/// Looks `sel` up on `class` and returns the marker of the result, or
/// `None` if the lookup forwarded.
pub fn send(rt: &Runtime, class: Class, sel: Selector) -> Option<u8> {
    let imp = rt.lookup(class, sel);
    (!imp.is_forward()).then(|| call_marker(imp, sel))
}

pub fn runtime() -> &'static Runtime {
    Runtime::new(RuntimeConfig::default())
}

/// Realizes `desc`, panicking on error.
pub fn realize(rt: &Runtime, desc: ClassDescriptor) -> Class {
    rt.realize(&Arc::new(desc)).expect("realize failed")
}

/// A root `Base` defining `sel` and a `Derived` subclass that does not.
pub fn base_derived(rt: &Runtime, prefix: &str, sel: &str) -> (Class, Class) {
    let base_name = format!("{prefix}Base");
    let base = realize(rt, ClassDescriptor::root(&base_name).method(sel, "v@:", marker(BASE)));
    let derived = realize(rt, ClassDescriptor::new(format!("{prefix}Derived"), base_name));
    (base, derived)
}
