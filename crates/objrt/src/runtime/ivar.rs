//! Instance variables and instance layout.

/// An instance variable: name, type encoding and placement in the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ivar {
    name: &'static str,
    types: &'static str,
    offset: usize,
    size: usize,
    align_log2: u8,
}

impl Ivar {
    pub(crate) fn new(
        name: &'static str,
        types: &'static str,
        offset: usize,
        size: usize,
        align_log2: u8,
    ) -> Ivar {
        Ivar { name, types, offset, size, align_log2 }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn types(&self) -> &'static str {
        self.types
    }

    /// Byte offset from the start of the instance.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn alignment(&self) -> usize {
        1 << self.align_log2
    }
}

/// Largest supported ivar alignment, as a power of two.
pub(crate) const MAX_ALIGN_LOG2: u8 = 12;

#[inline]
pub(crate) fn align_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// Word-aligned instance size.
#[inline]
pub(crate) fn word_align(size: usize) -> usize {
    align_up(size, size_of::<usize>())
}

/// Shifts a class's ivars so they start at or after `super_size`.
///
/// Returns the applied shift, rounded up to the largest ivar alignment so
/// every ivar stays aligned. Zero if the layout already fits.
pub(crate) fn slide(ivars: &mut [Ivar], instance_start: usize, super_size: usize) -> usize {
    if super_size <= instance_start {
        return 0;
    }

    let max_align = ivars.iter().map(Ivar::alignment).max().unwrap_or(1);
    let delta = align_up(super_size - instance_start, max_align);

    for ivar in ivars.iter_mut() {
        ivar.offset += delta;
    }
    delta
}
