//! Error types for arena allocation

use thiserror::Error;

/// Errors produced by the arena allocator.
#[derive(Error, Debug)]
pub enum ArenaError {
    /// A requested allocation exceeds the arena's configured maximum.
    #[error("allocation of {requested} bytes exceeds arena maximum of {max}")]
    TooLarge {
        /// Bytes requested.
        requested: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Convenience result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ArenaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_error_displays_both_sizes() {
        let err = ArenaError::TooLarge {
            requested: 100,
            max: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
    }
}
