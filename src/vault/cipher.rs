//! AEAD primitives for the secret vault.
//!
//! AES-256-GCM with a fresh 96-bit random nonce per write. The wire form
//! is `hex(nonce ‖ ciphertext ‖ tag)`; keys are exactly 32 bytes. Crypto
//! failures carry no detail about the stored data.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{Aes256Gcm, AeadCore, Key, KeyInit, Nonce};

/// AES-256-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Required key length in bytes.
pub const KEY_LEN: usize = 32;

/// Errors from vault cryptography. Messages stay generic so they can be
/// surfaced without leaking key or plaintext material.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_LEN} bytes")]
    InvalidKeyLength,
    #[error("encryption key is not valid hex")]
    InvalidKeyEncoding,
    #[error("malformed ciphertext")]
    MalformedCiphertext,
    #[error("decryption failed")]
    DecryptFailed,
    #[error("encryption failed")]
    EncryptFailed,
}

/// A fixed-key AES-256-GCM cipher producing the vault's hex wire format.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Build from raw key bytes. The key must be exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength);
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build from a hex-encoded 32-byte key, the form configuration uses.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let key = hex::decode(hex_key).map_err(|_| CryptoError::InvalidKeyEncoding)?;
        Self::new(&key)
    }

    /// Encrypt plaintext into `hex(nonce ‖ ciphertext ‖ tag)`. A fresh
    /// nonce is drawn per call, so equal plaintexts encrypt differently.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(&ciphertext);
        Ok(hex::encode(wire))
    }

    /// Decrypt the hex wire format back to plaintext bytes.
    pub fn decrypt(&self, wire: &str) -> Result<Vec<u8>, CryptoError> {
        let bytes = hex::decode(wire).map_err(|_| CryptoError::MalformedCiphertext)?;
        if bytes.len() <= NONCE_LEN {
            return Err(CryptoError::MalformedCiphertext);
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }

    /// Decrypt to a UTF-8 string, the vault's plaintext type.
    pub fn decrypt_str(&self, wire: &str) -> Result<String, CryptoError> {
        let bytes = self.decrypt(wire)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::DecryptFailed)
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("SecretCipher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_LEN] {
        [7u8; KEY_LEN]
    }

    #[test]
    fn test_round_trip() {
        let cipher = SecretCipher::new(&test_key()).unwrap();
        let wire = cipher.encrypt(b"sk-abc").unwrap();
        assert_eq!(cipher.decrypt_str(&wire).unwrap(), "sk-abc");
    }

    #[test]
    fn test_fresh_nonce_per_encrypt() {
        let cipher = SecretCipher::new(&test_key()).unwrap();
        let first = cipher.encrypt(b"same").unwrap();
        let second = cipher.encrypt(b"same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let cipher = SecretCipher::new(&test_key()).unwrap();
        let other = SecretCipher::new(&[9u8; KEY_LEN]).unwrap();
        let wire = cipher.encrypt(b"secret").unwrap();
        assert!(matches!(
            other.decrypt(&wire),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn test_key_length_enforced() {
        assert!(matches!(
            SecretCipher::new(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength)
        ));
    }

    #[test]
    fn test_malformed_ciphertext() {
        let cipher = SecretCipher::new(&test_key()).unwrap();
        assert!(cipher.decrypt("not-hex").is_err());
        assert!(cipher.decrypt("abcd").is_err());
    }

    #[test]
    fn test_from_hex_key() {
        let cipher = SecretCipher::from_hex(&hex::encode(test_key())).unwrap();
        let wire = cipher.encrypt(b"v").unwrap();
        assert_eq!(cipher.decrypt_str(&wire).unwrap(), "v");

        assert!(SecretCipher::from_hex("zz").is_err());
        assert!(SecretCipher::from_hex("abcd").is_err());
    }
}
