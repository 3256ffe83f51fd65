//! Class initialization.
//!
//! Before the first message to a class (or to instances of it), the runtime
//! sends `initialize` to the class, superclasses first. The thread running a
//! class's `initialize` may keep messaging the class; other threads block
//! until initialization completes. No runtime lock is held while
//! `initialize` runs.

use std::thread::{self, ThreadId};

use fxhash::FxBuildHasher;
use hashbrown::HashMap;
use objrt_log::info;
use parking_lot::{Condvar, Mutex};

use super::Runtime;
use super::class::{Class, ClassFlags};
use super::lookup::LookupBehavior;
use super::selector::builtins;

/// Which thread is initializing which class.
#[derive(Default)]
pub(crate) struct InitTable {
    owners: Mutex<HashMap<Class, ThreadId, FxBuildHasher>>,
    done: Condvar,
}

enum Claim {
    /// This thread must run `initialize`.
    Owner,
    /// Already initialized, or being initialized by this thread.
    Done,
}

impl Runtime {
    /// Runs `initialize` for `class` and its superclasses if they have not
    /// been initialized yet. Metaclasses initialize their instance class.
    pub fn initialize_class(&self, class: Class) {
        let class = class.instance_class();
        if class.flags().contains(ClassFlags::INITIALIZED) || !class.is_dispatchable() {
            return;
        }

        if let Some(superclass) = class.superclass() {
            self.initialize_class(superclass);
        }

        if let Claim::Done = self.claim(class) {
            return;
        }

        self.send_initialize(class);

        let mut owners = self.init.owners.lock();
        class.change_info(ClassFlags::INITIALIZED, ClassFlags::INITIALIZING);
        owners.remove(&class);
        self.init.done.notify_all();
    }

    fn claim(&self, class: Class) -> Claim {
        let me = thread::current().id();
        let mut owners = self.init.owners.lock();

        loop {
            let flags = class.flags();
            if flags.contains(ClassFlags::INITIALIZED) {
                return Claim::Done;
            }
            if !flags.contains(ClassFlags::INITIALIZING) {
                class.set_info(ClassFlags::INITIALIZING);
                owners.insert(class, me);
                return Claim::Owner;
            }
            if owners.get(&class) == Some(&me) {
                return Claim::Done;
            }
            self.init.done.wait(&mut owners);
        }
    }

    fn send_initialize(&self, class: Class) {
        let Some(meta) = class.metaclass() else {
            return;
        };

        let sel = builtins().initialize;
        let imp = self.lookup_imp(meta, sel, LookupBehavior::empty());
        if imp.is_forward() {
            return;
        }

        if self.config().print_initialize {
            info!("INITIALIZE: +[{} initialize]", class.name());
        }

        // SAFETY: `initialize` takes no arguments and returns nothing; the
        // receiver is the class itself.
        unsafe { imp.call(class.as_ptr(), sel, std::ptr::null(), std::ptr::null_mut()) };
    }

    /// True once `initialize` has completed for `class`.
    #[must_use]
    pub fn is_initialized(&self, class: Class) -> bool {
        class.instance_class().flags().contains(ClassFlags::INITIALIZED)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::RuntimeConfig;
    use crate::runtime::descriptor::ClassDescriptor;
    use crate::runtime::method::Imp;
    use crate::runtime::selector::{Selector, SelectorHandle};

    static INIT_COUNT: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_initialize(
        _: *mut c_void,
        _: SelectorHandle,
        _: *const *mut u8,
        _: *mut u8,
    ) {
        INIT_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn nop(_: *mut c_void, _: SelectorHandle, _: *const *mut u8, _: *mut u8) {}

    #[test]
    fn test_initialize_runs_once() {
        let rt = Runtime::new(RuntimeConfig::default());
        let class = rt
            .realize(&Arc::new(
                ClassDescriptor::root("InitOnce")
                    .class_method("initialize", "v@:", Imp::new(count_initialize))
                    .method("ping", "v@:", Imp::new(nop)),
            ))
            .unwrap();

        let before = INIT_COUNT.load(Ordering::SeqCst);
        assert!(!rt.is_initialized(class));

        let ping = Selector::intern("ping");
        rt.lookup(class, ping);
        rt.lookup(class, Selector::intern("init_test_other"));

        assert!(rt.is_initialized(class));
        assert_eq!(INIT_COUNT.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_class_without_initialize() {
        let rt = Runtime::new(RuntimeConfig::default());
        let class = rt.realize(&Arc::new(ClassDescriptor::root("NoInit"))).unwrap();

        rt.initialize_class(class);
        assert!(rt.is_initialized(class));
        assert!(class.metaclass().is_some_and(|m| rt.is_initialized(m)));
    }
}
