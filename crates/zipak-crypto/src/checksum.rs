//! CRC-32 and MD5 checksums used for entry validation and path hashing

use md5::{Digest, Md5};

/// Compute the CRC-32 (IEEE 802.3 polynomial, as used by PKZIP) of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Compute the MD5 digest of `data`, used by the maintenance API to verify
/// an archive against a known-good checksum independent of the entry's
/// stored CRC-32.
pub fn compute_md5(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_known_vector() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn md5_matches_known_vector() {
        let digest = compute_md5(b"");
        assert_eq!(hex::encode(digest), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
