//! Checksums and entry encryption for packaged game archives
//!
//! # Components
//!
//! - **Checksums**: CRC-32 for entry integrity and path hashing, MD5 for
//!   the maintenance API's whole-archive verification
//! - **Encryption**: ARC4 for the legacy `STREAMCIPHER` method, TEA for the
//!   legacy `TEA` method, and RSA-wrapped key tables for
//!   `STREAMCIPHER_KEYTABLE`
//!
//! # Examples
//!
//! ```
//! use zipak_crypto::checksum::compute_crc32;
//!
//! let crc = compute_crc32(b"Hello, World!");
//! println!("crc32: {crc:#010x}");
//! ```

#![warn(missing_docs)]

pub mod arc4;
pub mod checksum;
pub mod error;
pub mod keytable;
pub mod signature;
pub mod tea;

pub use arc4::Arc4Cipher;
pub use error::CryptoError;
pub use keytable::KeyTable;
