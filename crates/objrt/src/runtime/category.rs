//! Attaching categories to realized classes.
//!
//! A category's instance methods are prepended to the class's method lists
//! and its class methods to the metaclass's, so a category method shadows
//! the class's own method and categories attached later shadow earlier ones.
//! Protocols and properties are prepended the same way.
//!
//! Categories naming a class that has not been realized yet are parked and
//! attached, in load order, when the class is realized.
//!
//! # Names
//!
//! A category is identified by its name within its class. Attaching a
//! second category with a name the class already carries is rejected and
//! leaves the class untouched. The same name may be used on different
//! classes.
//!
//! # Caches
//!
//! After an attach, the caches of the class, its metaclass and everything
//! below both are flushed under the exclusive runtime lock. A lookup that
//! starts after [`Runtime::apply_category`] returns always sees the
//! category's methods.

use std::sync::Arc;

use objrt_log::{debug, info, warn};

use super::class::{Class, ClassFlags};
use super::descriptor::CategoryDescriptor;
use super::method::MethodList;
use super::{Runtime, RuntimeState};
use crate::error::{Error, Result};

impl Runtime {
    /// Attaches `category` to `class`.
    ///
    /// # Errors
    ///
    /// - [`Error::CategoryAlreadyExists`] if a category with the same name
    ///   is already attached
    /// - [`Error::ClassNotRegistered`] if the class is inert or disposed
    pub fn apply_category(&self, class: Class, category: &CategoryDescriptor) -> Result<()> {
        let mut state = self.state.write();
        self.attach_category_locked(&mut state, class, category)
    }

    /// Attaches categories in order. Returns the errors of the ones that
    /// were rejected; the others are attached.
    pub fn apply_categories(&self, class: Class, categories: &[Arc<CategoryDescriptor>]) -> Vec<Error> {
        let mut state = self.state.write();
        categories
            .iter()
            .filter_map(|category| self.attach_category_locked(&mut state, class, category).err())
            .collect()
    }

    /// Attaches `category` to the class it names, or parks it until that
    /// class is realized.
    ///
    /// Returns true if the category was attached now.
    ///
    /// # Errors
    ///
    /// See [`apply_category`](Self::apply_category).
    pub fn load_category(&self, category: &Arc<CategoryDescriptor>) -> Result<bool> {
        let mut state = self.state.write();
        self.load_category_locked(&mut state, category)
    }

    /// [`Runtime::load_category`] with the runtime lock held exclusively.
    pub(crate) fn load_category_locked(
        &self,
        state: &mut RuntimeState,
        category: &Arc<CategoryDescriptor>,
    ) -> Result<bool> {
        match state.classes.get(category.class_name.as_str()).copied() {
            Some(class) => self.attach_category_locked(state, class, category).map(|()| true),
            None => {
                self.park_category(state, &category.class_name, Arc::clone(category));
                Ok(false)
            }
        }
    }

    /// Queues `category` behind any categories already waiting on
    /// `class_name`, keeping load order.
    fn park_category(&self, state: &mut RuntimeState, class_name: &str, category: Arc<CategoryDescriptor>) {
        debug!("category {class_name}({}) parked until its class is loaded", category.name);
        state.unattached.entry(class_name.to_owned()).or_default().push(category);
    }

    /// Attaches the categories parked on a freshly realized class.
    ///
    /// A rejected category is logged and skipped; the rest still attach.
    pub(crate) fn attach_waiting_categories(&self, state: &mut RuntimeState, class: Class) {
        let Some(categories) = state.unattached.remove(class.name()) else {
            return;
        };

        for category in categories {
            if let Err(e) = self.attach_category_locked(state, class, &category) {
                warn!("{e}");
            }
        }
    }

    /// Attaches `category` to `class`, or to the class a metaclass
    /// describes.
    ///
    /// A class still parked in the `FUTURE` state takes the category later,
    /// when it completes. Instance methods, protocols and properties go to
    /// the front of the class's lists; class methods to the front of the
    /// metaclass's method lists.
    pub(crate) fn attach_category_locked(
        &self,
        state: &mut RuntimeState,
        class: Class,
        category: &CategoryDescriptor,
    ) -> Result<()> {
        let class = class.instance_class();
        let flags = class.flags();

        if flags.contains(ClassFlags::FUTURE) && !flags.contains(ClassFlags::INERT) {
            self.park_category(state, class.name(), Arc::new(category.clone()));
            return Ok(());
        }
        let Some(meta) = class.metaclass().filter(|_| class.is_dispatchable()) else {
            return Err(Error::ClassNotRegistered { name: class.name().to_owned() });
        };

        if class.rw().categories.iter().any(|name| *name == category.name) {
            warn!("category {}({}) is already attached", class.name(), category.name);
            return Err(Error::CategoryAlreadyExists {
                class: class.name().to_owned(),
                category: category.name.clone(),
            });
        }

        let owner = format!("{}({})", class.name(), category.name);
        let instance_methods = self.method_list(&owner, &category.instance_methods);
        let class_methods = self.method_list(&owner, &category.class_methods);
        let protocols = self.protocols_named(state, &owner, &category.protocols);
        let properties = self.properties(&category.properties);

        if self.config().print_replaced_methods {
            report_replaced(class, "-", &instance_methods, &owner);
            report_replaced(meta, "+", &class_methods, &owner);
        }

        {
            let mut rw = class.rw_mut();
            rw.prepend_methods(instance_methods);
            for (i, protocol) in protocols.into_iter().enumerate() {
                rw.protocols.insert(i, protocol);
            }
            for (i, property) in properties.into_iter().enumerate() {
                rw.properties.insert(i, property);
            }
            rw.categories.push(self.copy_str(&category.name));
        }
        meta.rw_mut().prepend_methods(class_methods);

        self.flush_subtree_caches(state, class);
        self.flush_subtree_caches(state, meta);

        debug!("attached category {owner}");
        Ok(())
    }
}

/// Logs every method in `list` that shadows one `class` already had.
fn report_replaced(class: Class, prefix: &str, list: &MethodList, owner: &str) {
    let rw = class.rw();
    for method in list.iter() {
        if let Some(old) = rw.find_method(method.selector()) {
            info!(
                "REPLACED: {prefix}[{} {}] {:?} by category {owner} {:?}",
                class.name(),
                method.selector(),
                old.imp(),
                method.imp()
            );
        }
    }
}
