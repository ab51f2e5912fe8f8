//! `STREAMCIPHER_KEYTABLE` support: an RSA-decrypted table of per-slot
//! stream-cipher keys, plus the legacy slot-derivation formula used by
//! `DEFLATE_AND_STREAMCIPHER` archives.

use rsa::Pkcs1v15Encrypt;
use rsa::RsaPrivateKey;

use crate::error::{CryptoError, Result};

/// Size in bytes of a single key-table slot.
pub const KEY_SLOT_LEN: usize = 16;
/// Size in bytes of the initialization vector stored at the front of the
/// decrypted blob.
pub const IV_LEN: usize = 16;

/// A decrypted stream-cipher key table: one shared IV plus N 16-byte keys,
/// selected per entry by [`crate::dirheader`]'s (not present in this crate)
/// `key_slot` field.
#[derive(Debug, Clone)]
pub struct KeyTable {
    iv: [u8; IV_LEN],
    slots: Vec<[u8; KEY_SLOT_LEN]>,
}

impl KeyTable {
    /// Decrypt `encrypted_blob` (the `CustomEncryptionHeader` payload) with
    /// the archive's embedded RSA private key, then split the result into
    /// an IV and a table of fixed-size key slots.
    pub fn decrypt(encrypted_blob: &[u8], private_key: &RsaPrivateKey) -> Result<Self> {
        let decrypted = private_key
            .decrypt(Pkcs1v15Encrypt, encrypted_blob)
            .map_err(|e| CryptoError::AsymmetricDecryptionFailed(e.to_string()))?;

        if decrypted.len() < IV_LEN || (decrypted.len() - IV_LEN) % KEY_SLOT_LEN != 0 {
            return Err(CryptoError::InvalidKeyFormat(format!(
                "decrypted key table has invalid length {}",
                decrypted.len()
            )));
        }

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&decrypted[..IV_LEN]);

        let slots = decrypted[IV_LEN..]
            .chunks_exact(KEY_SLOT_LEN)
            .map(|chunk| {
                let mut slot = [0u8; KEY_SLOT_LEN];
                slot.copy_from_slice(chunk);
                slot
            })
            .collect();

        Ok(Self { iv, slots })
    }

    /// Number of key slots in the table.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` if the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Shared initialization vector.
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Decrypt `data` in place using the key at `slot`, as an ARC4 keystream
    /// seeded from that key and the shared IV.
    pub fn decrypt_entry(&self, slot: u16, data: &mut [u8]) -> Result<()> {
        let key = self
            .slots
            .get(slot as usize)
            .ok_or(CryptoError::KeySlotOutOfRange(slot, self.slots.len()))?;

        let mut seed = Vec::with_capacity(KEY_SLOT_LEN + IV_LEN);
        seed.extend_from_slice(key);
        seed.extend_from_slice(&self.iv);
        let mut cipher = crate::arc4::Arc4Cipher::new(&seed)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        cipher.apply_keystream(data);
        Ok(())
    }
}

/// Legacy `DEFLATE_AND_STREAMCIPHER` key-slot index derivation.
///
/// Reproduces the original archive writer's formula verbatim; the constants
/// are not tunable and must not be "simplified" without breaking
/// compatibility with archives already written by that format.
#[cfg(feature = "legacy-keytable")]
pub fn legacy_key_slot(crc32: u32, data_offset: u32) -> u32 {
    let a = (crc32 ^ 0x9b7c_9df2) % 3_302_203_733;
    let b = (data_offset ^ 0xce30_acdf) % 30829;
    a ^ b
}

#[cfg(all(test, feature = "legacy-keytable"))]
mod legacy_tests {
    use super::*;

    #[test]
    fn legacy_key_slot_is_deterministic() {
        assert_eq!(legacy_key_slot(0x1234_5678, 1024), legacy_key_slot(0x1234_5678, 1024));
        assert_ne!(legacy_key_slot(0x1234_5678, 1024), legacy_key_slot(0x1234_5678, 2048));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPublicKey;

    fn test_key_pair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rand_08::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation");
        let public_key = RsaPublicKey::from(&private_key);
        (private_key, public_key)
    }

    #[test]
    fn decrypt_round_trips_iv_and_slots() {
        let (private_key, public_key) = test_key_pair();
        let mut rng = rand_08::thread_rng();

        let mut plaintext = vec![0u8; IV_LEN + 2 * KEY_SLOT_LEN];
        for (i, b) in plaintext.iter_mut().enumerate() {
            *b = i as u8;
        }

        let encrypted = public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, &plaintext)
            .expect("encrypt with test key");

        let table = KeyTable::decrypt(&encrypted, &private_key).expect("decrypt with test key");
        assert_eq!(table.len(), 2);
        assert_eq!(table.iv(), &plaintext[..IV_LEN]);
    }

    #[test]
    fn decrypt_rejects_malformed_blob() {
        let (private_key, _) = test_key_pair();
        let bogus = vec![0u8; 128];
        assert!(KeyTable::decrypt(&bogus, &private_key).is_err());
    }

    #[test]
    fn decrypt_entry_rejects_out_of_range_slot() {
        let (private_key, public_key) = test_key_pair();
        let mut rng = rand_08::thread_rng();
        let plaintext = vec![0u8; IV_LEN + KEY_SLOT_LEN];
        let encrypted = public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, &plaintext)
            .expect("encrypt with test key");
        let table = KeyTable::decrypt(&encrypted, &private_key).expect("decrypt with test key");

        let mut data = [0u8; 4];
        assert!(table.decrypt_entry(5, &mut data).is_err());
    }
}
