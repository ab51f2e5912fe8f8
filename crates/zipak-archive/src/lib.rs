//! Read/write packaged ZIP archive layer for game asset pipelines.
//!
//! This crate builds the runtime half of the virtual filesystem on top of
//! `zipak-format`'s binary structures: opening and validating archives
//! ([`cache_factory`]), serving reads from a mounted archive ([`cache`]),
//! updating an archive's entries in place or by compaction ([`cache_rw`]),
//! streaming a single entry as a cursor ([`pseudo_file`]), merging loose
//! filesystem and packed directory scans ([`find_iterator`]), and resolving
//! logical game paths across every mount under a priority policy
//! ([`pak_manager`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use zipak_archive::pak_manager::{PakManager, PakPriority, ResolveHint};
//! use zipak_archive::cache_factory::{InitMethod, OpenFlags};
//!
//! let manager = PakManager::new("/game/data", PakPriority::PakFirst);
//! manager.open_pack("levels/", "/game/data/levels.pak", OpenFlags::default(), InitMethod::Fast, None, None)?;
//! let handle = manager.fopen("levels/intro.lvl", ResolveHint::default())?;
//! # Ok::<(), zipak_archive::error::ArchiveError>(())
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

pub mod cache;
pub mod cache_factory;
pub mod cache_rw;
pub mod config;
pub mod error;
pub mod find_iterator;
pub mod pak_manager;
pub mod pseudo_file;
pub mod zip_file;

pub use cache::{Cache, EncryptionKind};
pub use config::{EncryptionPolicy, PakConfig};
pub use cache_factory::{InitMethod, OpenFlags};
pub use cache_rw::CacheRw;
pub use error::{ArchiveError, Result};
pub use find_iterator::{FindEntry, FindIterator};
pub use pak_manager::{PakManager, PakPriority, ResolveHint, Resolved};
pub use pseudo_file::{PseudoFile, Whence};
