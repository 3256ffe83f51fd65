//! Arena allocator for `objrt` runtime metadata.
//!
//! The runtime never frees selectors, class records or type encodings in the
//! common path, so they are bump-allocated from a thread-safe arena. The
//! arena provides:
//!
//! - **Fast allocation** through an atomic bump pointer
//! - **Stable pointers** (memory never moves or gets reused)
//! - **Thread safety** (any thread may allocate concurrently)
//!
//! # Lifetime
//!
//! Values placed in a [`GlobalArena`] are never dropped. Chunks are leaked
//! once allocated, which is what lets [`GlobalArena::leak`] hand out
//! `&'static` references.
//!
//! # Examples
//!
//! ```
//! use objrt_mem::GlobalArena;
//!
//! let arena = GlobalArena::leak(65536);
//!
//! let value: &'static mut u32 = arena.alloc(42);
//! let name: &'static str = arena.alloc_str("initWithFrame:");
//!
//! assert_eq!(*value, 42);
//! assert_eq!(name, "initWithFrame:");
//! ```

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Error type for arena allocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaAllocError;

impl std::fmt::Display for ArenaAllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Arena allocation failed: out of memory")
    }
}

impl std::error::Error for ArenaAllocError {}

/// Default alignment for arena allocations (8 bytes).
const DEFAULT_ALIGNMENT: usize = 8;

/// Minimum chunk size (8 KiB).
const MIN_CHUNK_SIZE: usize = 8192;

/// Maximum chunk size for regular growth (1 MiB).
const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Arena allocation statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Total number of bytes allocated across all chunks.
    pub total_allocated: usize,
    /// Number of chunks in the arena.
    pub chunk_count: usize,
    /// Total capacity of all chunks in bytes.
    pub total_capacity: usize,
}

/// A fixed-size memory region with an atomic bump pointer.
///
/// Chunks are allocated with `std::alloc` and leaked; their memory stays
/// valid for the rest of the process.
struct Chunk {
    /// Current bump pointer (atomic for thread safety).
    /// Stored as `AtomicPtr` to keep provenance across updates.
    ptr: AtomicPtr<u8>,
    /// End of the chunk's memory region (exclusive).
    end: NonNull<u8>,
    /// Total capacity of the chunk in bytes.
    capacity: usize,
}

impl Chunk {
    fn new(size: usize) -> Result<&'static Self, ArenaAllocError> {
        let size = size.max(MIN_CHUNK_SIZE);
        let layout = Layout::from_size_align(size, DEFAULT_ALIGNMENT)
            .map_err(|_| ArenaAllocError)?;

        // SAFETY: layout has a non-zero size.
        let start = unsafe { alloc::alloc(layout) };
        let start = NonNull::new(start).ok_or(ArenaAllocError)?;

        // SAFETY: one-past-the-end of the allocation, only used for bounds.
        let end = unsafe { NonNull::new_unchecked(start.as_ptr().add(size)) };

        Ok(Box::leak(Box::new(Chunk {
            ptr: AtomicPtr::new(start.as_ptr()),
            end,
            capacity: size,
        })))
    }

    /// Bump-allocates `size` bytes aligned to `align`.
    #[inline(always)]
    fn try_alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        loop {
            let current = self.ptr.load(Ordering::Acquire);
            let current_addr = current.addr();

            let aligned_start = (current_addr + align - 1) & !(align - 1);
            let new_addr = aligned_start.checked_add(size)?;

            if new_addr > self.end.addr().get() {
                return None;
            }

            let new_ptr = current.with_addr(new_addr);

            if self
                .ptr
                .compare_exchange_weak(
                    current,
                    new_ptr,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                // SAFETY: aligned_start lies inside this chunk (checked above)
                // and with_addr keeps the chunk's provenance.
                return Some(unsafe {
                    NonNull::new_unchecked(current.with_addr(aligned_start))
                });
            }
        }
    }
}

/// Thread-safe arena for runtime metadata.
///
/// `GlobalArena` backs every long-lived allocation of a runtime: interned
/// selector names, class records and type-encoding strings. Allocation is a
/// CAS on the current chunk's bump pointer; a new chunk is only created when
/// the current one is exhausted.
///
/// # Examples
///
/// ```
/// use objrt_mem::GlobalArena;
///
/// let arena = GlobalArena::new(65536);
///
/// let value1 = arena.alloc(42u32);
/// let value2 = arena.alloc(100u64);
///
/// assert_eq!(*value1, 42);
/// assert_eq!(*value2, 100);
///
/// let stats = arena.stats();
/// assert!(stats.total_allocated >= 12);
/// ```
pub struct GlobalArena {
    /// Every chunk ever allocated by this arena.
    chunks: Mutex<Vec<&'static Chunk>>,
    /// Chunk that serves new allocations.
    current_chunk: AtomicPtr<Chunk>,
    /// Size of the next chunk to allocate.
    chunk_size: AtomicUsize,
    /// Total bytes handed out.
    total_allocated: AtomicUsize,
}

// SAFETY: chunks are only mutated through atomics or under the mutex, and
// allocated memory is handed out exactly once.
unsafe impl Send for GlobalArena {}
unsafe impl Sync for GlobalArena {}

impl GlobalArena {
    /// Creates a new arena whose first chunk holds `chunk_size` bytes
    /// (rounded up to a power of two, at least 8 KiB).
    ///
    /// # Errors
    ///
    /// Returns [`ArenaAllocError`] if the first chunk cannot be allocated.
    pub fn try_new(chunk_size: usize) -> Result<Self, ArenaAllocError> {
        let size = chunk_size.max(MIN_CHUNK_SIZE).next_power_of_two();
        let first = Chunk::new(size)?;

        Ok(GlobalArena {
            chunks: Mutex::new(vec![first]),
            current_chunk: AtomicPtr::new(std::ptr::from_ref(first).cast_mut()),
            chunk_size: AtomicUsize::new(size),
            total_allocated: AtomicUsize::new(0),
        })
    }

    /// Creates a new arena.
    ///
    /// # Panics
    ///
    /// Panics if the initial chunk allocation fails.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self::try_new(chunk_size).expect("Failed to allocate initial chunk")
    }

    /// Creates an arena that lives for the rest of the process.
    ///
    /// Allocations from a leaked arena are `&'static`.
    ///
    /// # Panics
    ///
    /// Panics if the initial chunk allocation fails.
    #[must_use]
    pub fn leak(chunk_size: usize) -> &'static Self {
        Box::leak(Box::new(Self::new(chunk_size)))
    }

    /// Allocates a value in the arena.
    ///
    /// The value is never dropped.
    ///
    /// # Panics
    ///
    /// Panics if a new chunk is needed and cannot be allocated.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T>(&self, value: T) -> &mut T {
        self.try_alloc(value).expect("Arena allocation failed")
    }

    /// Allocates a value in the arena, reporting exhaustion as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaAllocError`] if a new chunk cannot be allocated.
    #[allow(clippy::mut_from_ref)]
    pub fn try_alloc<T>(&self, value: T) -> Result<&mut T, ArenaAllocError> {
        let size = std::mem::size_of::<T>().max(1);
        let align = std::mem::align_of::<T>().max(DEFAULT_ALIGNMENT);
        let ptr = self.alloc_raw(size, align)?.cast::<T>();

        // SAFETY: ptr is freshly allocated, aligned for T and exclusively
        // owned by this call.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Copies a string into the arena.
    ///
    /// # Panics
    ///
    /// Panics if a new chunk is needed and cannot be allocated.
    pub fn alloc_str(&self, s: &str) -> &str {
        self.try_alloc_str(s).expect("Arena allocation failed")
    }

    /// Copies a string into the arena, reporting exhaustion as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaAllocError`] if a new chunk cannot be allocated.
    pub fn try_alloc_str(&self, s: &str) -> Result<&str, ArenaAllocError> {
        if s.is_empty() {
            return Ok("");
        }

        let ptr = self.alloc_raw(s.len(), 1)?;

        // SAFETY: ptr is valid for s.len() fresh bytes that do not overlap
        // the source, and the copied bytes are valid UTF-8.
        unsafe {
            std::ptr::copy_nonoverlapping(s.as_ptr(), ptr.as_ptr(), s.len());
            let bytes = std::slice::from_raw_parts(ptr.as_ptr(), s.len());
            Ok(std::str::from_utf8_unchecked(bytes))
        }
    }

    fn alloc_raw(
        &self,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, ArenaAllocError> {
        loop {
            let current = self.current_chunk.load(Ordering::Acquire);

            // SAFETY: current always points to a leaked chunk.
            let chunk = unsafe { &*current };

            if let Some(ptr) = chunk.try_alloc(size, align) {
                self.total_allocated.fetch_add(size, Ordering::Relaxed);
                return Ok(ptr);
            }

            self.allocate_new_chunk(current, size + align)?;
        }
    }

    /// Installs a fresh chunk unless another thread already replaced `seen`.
    #[cold]
    fn allocate_new_chunk(
        &self,
        seen: *mut Chunk,
        min_size: usize,
    ) -> Result<(), ArenaAllocError> {
        let mut chunks = self
            .chunks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if self.current_chunk.load(Ordering::Acquire) != seen {
            return Ok(());
        }

        let next = (self.chunk_size.load(Ordering::Relaxed) * 2)
            .min(MAX_CHUNK_SIZE)
            .max(min_size);
        let chunk = Chunk::new(next)?;

        chunks.push(chunk);
        self.chunk_size.store(next, Ordering::Relaxed);
        self.current_chunk
            .store(std::ptr::from_ref(chunk).cast_mut(), Ordering::Release);

        Ok(())
    }

    /// Returns allocation statistics for this arena.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let chunks = self
            .chunks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        ArenaStats {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            chunk_count: chunks.len(),
            total_capacity: chunks.iter().map(|c| c.capacity).sum(),
        }
    }
}
