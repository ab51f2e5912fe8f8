//! TEA block cipher for the legacy `TEA` entry encryption method.
//!
//! Hand-rolled to match the original archive writer bit-for-bit: 32 Feistel
//! rounds, delta `0x9E3779B9`, operating on 64-bit blocks under a 128-bit
//! key. No actively maintained `tea` crate tracks this exact variant, so
//! the algorithm is implemented directly, the same way [`crate::arc4`]
//! reimplements ARC4 rather than pulling in an RC4 crate.

const DELTA: u32 = 0x9E37_79B9;
const ROUNDS: u32 = 32;

/// A 128-bit TEA key, as 4 little-endian 32-bit words.
#[derive(Debug, Clone, Copy)]
pub struct TeaKey(pub [u32; 4]);

impl TeaKey {
    /// Build a key from 16 raw bytes (little-endian words).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut words = [0u32; 4];
        for (i, chunk) in bytes.chunks_exact(4).enumerate() {
            words[i] = u32::from_le_bytes(chunk.try_into().unwrap());
        }
        Self(words)
    }
}

/// Encrypt one 64-bit block in place.
pub fn encrypt_block(block: &mut [u32; 2], key: &TeaKey) {
    let (mut v0, mut v1) = (block[0], block[1]);
    let k = key.0;
    let mut sum = 0u32;
    for _ in 0..ROUNDS {
        sum = sum.wrapping_add(DELTA);
        v0 = v0.wrapping_add(
            (v1 << 4)
                .wrapping_add(k[0])
                ^ v1.wrapping_add(sum)
                ^ (v1 >> 5).wrapping_add(k[1]),
        );
        v1 = v1.wrapping_add(
            (v0 << 4)
                .wrapping_add(k[2])
                ^ v0.wrapping_add(sum)
                ^ (v0 >> 5).wrapping_add(k[3]),
        );
    }
    block[0] = v0;
    block[1] = v1;
}

/// Decrypt one 64-bit block in place.
pub fn decrypt_block(block: &mut [u32; 2], key: &TeaKey) {
    let (mut v0, mut v1) = (block[0], block[1]);
    let k = key.0;
    let mut sum = DELTA.wrapping_mul(ROUNDS);
    for _ in 0..ROUNDS {
        v1 = v1.wrapping_sub(
            (v0 << 4)
                .wrapping_add(k[2])
                ^ v0.wrapping_add(sum)
                ^ (v0 >> 5).wrapping_add(k[3]),
        );
        v0 = v0.wrapping_sub(
            (v1 << 4)
                .wrapping_add(k[0])
                ^ v1.wrapping_add(sum)
                ^ (v1 >> 5).wrapping_add(k[1]),
        );
        sum = sum.wrapping_sub(DELTA);
    }
    block[0] = v0;
    block[1] = v1;
}

/// Decrypt a buffer in place, 8 bytes at a time. `data.len()` must be a
/// multiple of 8; a short trailing partial block is left untouched, as the
/// legacy writer never produced one (entries encrypted with TEA are padded
/// to a block boundary before the compressed size is recorded).
pub fn decrypt_buffer(data: &mut [u8], key: &TeaKey) {
    for chunk in data.chunks_exact_mut(8) {
        let mut block = [
            u32::from_le_bytes(chunk[0..4].try_into().unwrap()),
            u32::from_le_bytes(chunk[4..8].try_into().unwrap()),
        ];
        decrypt_block(&mut block, key);
        chunk[0..4].copy_from_slice(&block[0].to_le_bytes());
        chunk[4..8].copy_from_slice(&block[1].to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = TeaKey::from_bytes([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        let original = [0x1234_5678u32, 0x9abc_def0];
        let mut block = original;
        encrypt_block(&mut block, &key);
        assert_ne!(block, original);
        decrypt_block(&mut block, &key);
        assert_eq!(block, original);
    }

    #[test]
    fn decrypt_buffer_round_trips_multi_block() {
        let key = TeaKey::from_bytes([0u8; 16]);
        let plain: [u8; 16] = *b"0123456789abcdef";
        let mut data = plain;
        for chunk in data.chunks_exact_mut(8) {
            let mut block = [
                u32::from_le_bytes(chunk[0..4].try_into().unwrap()),
                u32::from_le_bytes(chunk[4..8].try_into().unwrap()),
            ];
            encrypt_block(&mut block, &key);
            chunk[0..4].copy_from_slice(&block[0].to_le_bytes());
            chunk[4..8].copy_from_slice(&block[1].to_le_bytes());
        }
        assert_ne!(data, plain);
        decrypt_buffer(&mut data, &key);
        assert_eq!(data, plain);
    }
}
