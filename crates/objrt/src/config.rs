//! Runtime configuration.

use objrt_log::Level;

/// Smallest cache table the runtime allocates.
pub const MIN_CACHE_CAPACITY: usize = 4;

/// Configuration for a [`Runtime`](crate::Runtime).
///
/// Built with chained `with_*` calls on top of [`Default`]:
///
/// ```
/// use objrt::RuntimeConfig;
/// use objrt_log::Level;
///
/// let config = RuntimeConfig::default()
///     .with_log_level(Level::Debug)
///     .with_initial_cache_capacity(16)
///     .with_print_initialize(true);
///
/// assert_eq!(config.initial_cache_capacity, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Log level applied to the process logger when the runtime is created.
    /// `None` leaves the logger untouched.
    pub log_level: Option<Level>,
    /// Capacity of a class's first cache table. Rounded up to a power of two,
    /// at least [`MIN_CACHE_CAPACITY`].
    pub initial_cache_capacity: usize,
    /// Log every method implementation replaced by a category or by
    /// `replace_method`.
    pub print_replaced_methods: bool,
    /// Log every `initialize` message sent.
    pub print_initialize: bool,
    /// Log methods supplied by a resolver hook.
    pub print_resolved_methods: bool,
    /// Log class realization, ivar sliding and category attachment.
    pub print_class_setup: bool,
    /// Log cache tables as they are swapped out by growth or a flush.
    pub print_cache_collection: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            log_level: None,
            initial_cache_capacity: MIN_CACHE_CAPACITY,
            print_replaced_methods: false,
            print_initialize: false,
            print_resolved_methods: false,
            print_class_setup: false,
            print_cache_collection: false,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_initial_cache_capacity(mut self, capacity: usize) -> Self {
        self.initial_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_print_replaced_methods(mut self, enabled: bool) -> Self {
        self.print_replaced_methods = enabled;
        self
    }

    #[must_use]
    pub fn with_print_initialize(mut self, enabled: bool) -> Self {
        self.print_initialize = enabled;
        self
    }

    #[must_use]
    pub fn with_print_resolved_methods(mut self, enabled: bool) -> Self {
        self.print_resolved_methods = enabled;
        self
    }

    #[must_use]
    pub fn with_print_class_setup(mut self, enabled: bool) -> Self {
        self.print_class_setup = enabled;
        self
    }

    #[must_use]
    pub fn with_print_cache_collection(mut self, enabled: bool) -> Self {
        self.print_cache_collection = enabled;
        self
    }

    /// Effective first-table capacity: a power of two, at least
    /// [`MIN_CACHE_CAPACITY`].
    #[must_use]
    pub fn cache_capacity(&self) -> usize {
        self.initial_cache_capacity
            .max(MIN_CACHE_CAPACITY)
            .next_power_of_two()
    }
}
