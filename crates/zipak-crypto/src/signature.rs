//! RSA signature verification for a signed central directory record.

use rsa::Pkcs1v15Sign;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, Result};

/// Verify a PKCS#1 v1.5 RSA signature over `message` against `public_key`.
/// `message` is the archive's raw central directory bytes; `signature` is
/// the `SignedCdrHeader` payload recovered from the trailing headers.
pub fn verify(message: &[u8], signature: &[u8], public_key: &RsaPublicKey) -> Result<()> {
    let digest = Sha256::digest(message);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    fn test_key_pair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rand_08::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation");
        let public_key = RsaPublicKey::from(&private_key);
        (private_key, public_key)
    }

    #[test]
    fn verify_accepts_matching_signature() {
        let (private_key, public_key) = test_key_pair();
        let message = b"pretend central directory bytes";
        let digest = Sha256::digest(message);
        let signature = private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .expect("sign with test key");

        assert!(verify(message, &signature, &public_key).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let (private_key, public_key) = test_key_pair();
        let message = b"pretend central directory bytes";
        let digest = Sha256::digest(message);
        let signature = private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .expect("sign with test key");

        assert!(verify(b"different bytes entirely", &signature, &public_key).is_err());
    }
}
