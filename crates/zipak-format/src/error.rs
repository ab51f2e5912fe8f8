//! Error types for ZIP structure parsing
//!
//! Mirrors the error taxonomy produced by the original CryEngine `ZipDir`
//! layer so callers further up the stack can map a single enum onto the
//! full range of archive failures instead of inspecting raw I/O errors.

use thiserror::Error;

/// Errors produced while reading or building ZIP directory structures.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Underlying I/O failure while reading or seeking the archive.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A binary structure failed to parse at a given position.
    #[error("binary parse error: {0}")]
    BinRw(#[from] binrw::Error),

    /// End-of-central-directory record could not be located.
    #[error("no end-of-central-directory record found in archive")]
    NoCdr,

    /// Central directory failed a structural consistency check.
    #[error("central directory is corrupt: {0}")]
    CdrIsCorrupt(String),

    /// A local or central file header failed a structural consistency check.
    #[error("data is corrupt: {0}")]
    DataIsCorrupt(String),

    /// The archive's embedded signature failed verification.
    #[error("invalid archive signature")]
    InvalidSignature,

    /// A feature used by the archive is not supported by this reader.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A requested path could not be found in the directory.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A requested directory could not be found.
    #[error("directory not found: {0}")]
    DirNotFound(String),

    /// Archive exceeds the maximum size this reader is willing to index.
    #[error("archive too large: {0} bytes")]
    ArchiveTooLarge(u64),
}

/// Convenience result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, FormatError>;
