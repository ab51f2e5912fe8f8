//! On-disk ZIP structures and the in-memory directory built from them
//!
//! This crate owns the binary layer of a packaged archive: the local file
//! header, central directory file header, end-of-central-directory record,
//! and the small set of trailing headers a writer may append for encrypted
//! or signed archives ([`structures`]); the backward EOCD scan and central
//! directory parse that turns raw bytes into a [`dirheader::DirHeader`]
//! ([`scan`]); and the path normalization rules every lookup agrees on
//! ([`path`]).
//!
//! # Design Principles
//!
//! - **Binary search directories**: dir/file children are kept sorted so
//!   lookups never degrade to a linear scan.
//! - **Case and separator insensitive**: every lookup goes through
//!   [`path::normalize`] first.
//! - **No silent truncation**: a malformed central directory is an error,
//!   never a best-effort partial parse.

#![allow(clippy::cast_possible_truncation)]
#![warn(missing_docs)]

pub mod dirheader;
pub mod error;
pub mod magic;
pub mod path;
pub mod scan;
pub mod structures;

pub use dirheader::{DirEntry, DirHeader, FileEntry};
pub use error::{FormatError, Result};
pub use structures::{CompressionMethod, GeneralPurposeFlags};
