//! `objrt` memory management infrastructure
//!
//! This crate provides the allocation primitives used by the `objrt`
//! runtime for metadata that lives as long as the runtime itself:
//!
//! - **Arena allocator**: thread-safe bump-pointer allocation with stable
//!   addresses ([`GlobalArena`])
//! - **String storage**: arena-backed `&str` copies for selector names,
//!   class names and type encodings

pub mod arena;

pub use arena::{ArenaAllocError, ArenaStats, GlobalArena};
