use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CryptoError, CryptoResult};
use crate::hasher::ContentHasher;
use crate::keybag::StoreKey;

const IV_LENGTH: usize = 12;

/// Symmetric encryption bound to a single store's key.
///
/// Implementations are deterministic: encrypting the same plaintext twice
/// yields the same ciphertext, so content-addressed writes stay idempotent.
pub trait KeyedCrypto: Send + Sync + fmt::Debug {
    /// `false` for the pass-through implementation.
    fn is_encrypting(&self) -> bool;

    /// Short identifier of the bound key, for logs.
    fn fingerprint(&self) -> String;

    fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>>;
}

/// Envelope written for every encrypted payload.
#[derive(Serialize, Deserialize)]
struct Envelope {
    iv: [u8; IV_LENGTH],
    key_id: [u8; 8],
    data: Vec<u8>,
}

/// AES-256-GCM with IVs derived from the plaintext hash.
pub struct AesGcmCrypto {
    cipher: Aes256Gcm,
    key_id: [u8; 8],
    key_name: String,
}

impl AesGcmCrypto {
    pub fn new(key: &StoreKey) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.bytes()));
        Self {
            cipher,
            key_id: key.key_id(),
            key_name: key.name().to_string(),
        }
    }

    fn derive_iv(plaintext: &[u8]) -> [u8; IV_LENGTH] {
        let hash = ContentHasher::IV.hash(plaintext);
        let mut iv = [0u8; IV_LENGTH];
        for (i, b) in hash.as_bytes().iter().enumerate() {
            iv[i % IV_LENGTH] ^= b;
        }
        iv
    }
}

impl KeyedCrypto for AesGcmCrypto {
    fn is_encrypting(&self) -> bool {
        true
    }

    fn fingerprint(&self) -> String {
        hex::encode(self.key_id)
    }

    fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let iv = Self::derive_iv(plaintext);
        let data = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;
        let envelope = Envelope {
            iv,
            key_id: self.key_id,
            data,
        };
        bincode::serialize(&envelope).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        let envelope: Envelope = bincode::deserialize(ciphertext)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        if envelope.key_id != self.key_id {
            return Err(CryptoError::UnknownKey {
                expected: self.fingerprint(),
                found: hex::encode(envelope.key_id),
            });
        }
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&envelope.iv), envelope.data.as_ref())
            .map_err(|_| CryptoError::Decrypt)?;
        if Self::derive_iv(&plaintext) != envelope.iv {
            debug!(key = %self.key_name, "derived iv does not match envelope");
            return Err(CryptoError::IvMismatch);
        }
        Ok(plaintext)
    }
}

impl fmt::Debug for AesGcmCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmCrypto")
            .field("key_name", &self.key_name)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Pass-through crypto for stores opened with `storekey=insecure`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InsecureCrypto;

impl KeyedCrypto for InsecureCrypto {
    fn is_encrypting(&self) -> bool {
        false
    }

    fn fingerprint(&self) -> String {
        "insecure".to_string()
    }

    fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> StoreKey {
        StoreKey::new("@test:data@", [seed; 32])
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let crypto = AesGcmCrypto::new(&key(1));
        let ct = crypto.encrypt(b"secret block").unwrap();
        assert_ne!(ct, b"secret block".to_vec());
        assert_eq!(crypto.decrypt(&ct).unwrap(), b"secret block".to_vec());
    }

    #[test]
    fn encryption_is_deterministic() {
        let crypto = AesGcmCrypto::new(&key(1));
        assert_eq!(crypto.encrypt(b"same").unwrap(), crypto.encrypt(b"same").unwrap());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let a = AesGcmCrypto::new(&key(1));
        let b = AesGcmCrypto::new(&key(2));
        let ct = a.encrypt(b"data").unwrap();
        assert!(matches!(b.decrypt(&ct), Err(CryptoError::UnknownKey { .. })));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let crypto = AesGcmCrypto::new(&key(3));
        let mut ct = crypto.encrypt(b"payload").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        assert_eq!(crypto.decrypt(&ct), Err(CryptoError::Decrypt));
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        let crypto = AesGcmCrypto::new(&key(4));
        assert!(matches!(
            crypto.decrypt(b"xx"),
            Err(CryptoError::Serialization(_))
        ));
    }

    #[test]
    fn insecure_is_pass_through() {
        let crypto = InsecureCrypto;
        assert!(!crypto.is_encrypting());
        assert_eq!(crypto.encrypt(b"plain").unwrap(), b"plain".to_vec());
        assert_eq!(crypto.decrypt(b"plain").unwrap(), b"plain".to_vec());
    }
}
