//! Tiered thread-safe arena allocator for packaged archive I/O
//!
//! Decompressing and re-packing entries out of a large archive allocates a
//! great many short-lived buffers. This crate provides a tiered allocator
//! that absorbs most of that churn in reusable pools instead of round
//! tripping through the system allocator on every call:
//!
//! - [`pool::Arena`]: the tiered allocator itself — fixed-size pool,
//!   big-slot pool, size-classed general heap, and a system-allocator
//!   fallback, each tier reported through [`pool::ArenaStats`].
//! - [`cookie`]: a zlib-compatible `alloc_func`/`free_func` pair, for
//!   archive backends that link a C zlib implementation honoring custom
//!   allocator callbacks.
//! - [`error`]: error types for callers that enforce an allocation ceiling.
//!
//! # Example
//!
//! ```
//! use zipak_arena::Arena;
//!
//! let arena = Arena::new();
//! let buffer = arena.temp_alloc(8 * 1024);
//! arena.temp_free(buffer);
//! println!("{:?}", arena.stats());
//! ```
//!
//! Callers choose [`pool::Arena::temp_alloc`]/[`pool::Arena::temp_free`]
//! for buffers scoped to a single call (inflate scratch space) or
//! [`pool::Arena::persistent_alloc`]/[`pool::Arena::persistent_free`] for
//! buffers handed back to a caller that outlive it. Both pairs share the
//! same tiering and free-path dispatch; the split exists so a buffer freed
//! through the wrong entry point is caught in debug builds.

#![warn(missing_docs)]

pub mod cookie;
pub mod error;
pub mod pool;

pub use error::ArenaError;
pub use pool::{Arena, ArenaBuffer, ArenaStats, ArenaStatsSnapshot, Persistence, Tier};
