//! Error types for the archive, pak-manager, and pseudo-file layers

use thiserror::Error;

/// Errors produced by opening, reading, writing, or resolving through a
/// packaged archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Underlying platform I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP binary structure parsing failed.
    #[error(transparent)]
    Format(#[from] zipak_format::FormatError),

    /// Checksum or encryption failed.
    #[error(transparent)]
    Crypto(#[from] zipak_crypto::CryptoError),

    /// DEFLATE/inflate failed.
    #[error("zlib error: {0}")]
    Zlib(String),

    /// Entry CRC mismatch, decryption failure, or unsupported encryption method.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// Local header and CDR disagree, or in-place content mismatch.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Multi-volume archive, unknown method, or write attempt on a read-only archive.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Null required argument, or write op on a read-only archive.
    #[error("invalid call: {0}")]
    InvalidCall(String),

    /// Empty path, or path escapes the bind-root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Lookup against a file path missed.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Lookup against a directory path missed.
    #[error("directory not found: {0}")]
    DirNotFound(String),

    /// `CREATE_NEW` against an existing target.
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    /// Allocation failed in a non-fallback tier with fallback disabled.
    #[error(transparent)]
    Arena(#[from] zipak_arena::ArenaError),

    /// Called a read-write-only operation on a read-only cache.
    #[error("not implemented on read-only archive: {0}")]
    NotImplemented(String),

    /// A pseudo-file handle did not refer to an open pseudo-file.
    #[error("invalid pseudo-file handle: {0}")]
    InvalidHandle(u32),

    /// A find-iterator handle did not refer to an open search.
    #[error("invalid find handle: {0}")]
    InvalidFindHandle(u32),
}

/// Convenience result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;
