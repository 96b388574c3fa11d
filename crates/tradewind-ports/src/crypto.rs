//! Crypto port: SHA-256 and AEAD primitives.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{PortError, PortResult};

/// AEAD nonce length in bytes (96-bit, the AES-GCM standard size).
pub const NONCE_LEN: usize = 12;

/// 256-bit AEAD key.
///
/// Deliberately opaque: no `Debug`, `Display` or serde impls, so a key can
/// never leak into logs or persisted state.
#[derive(Clone)]
pub struct AeadKey([u8; 32]);

impl AeadKey {
    /// Wraps raw key bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a 64-character hex string into a key.
    pub fn from_hex(hex: &str) -> PortResult<Self> {
        let hex = hex.trim();
        if hex.len() != 64 {
            return Err(PortError::InvalidKey(format!(
                "expected 64 hex characters, got {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk)
                .map_err(|_| PortError::InvalidKey("non-utf8 key material".to_string()))?;
            bytes[i] = u8::from_str_radix(pair, 16)
                .map_err(|_| PortError::InvalidKey(format!("invalid hex at byte {i}")))?;
        }
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Port to the cryptographic primitives the codec builds on.
///
/// Nonces are supplied by the caller (the codec draws them from `OsRng`)
/// and must never be reused with the same key. The ciphertext returned by
/// `aead_encrypt` carries the auth tag appended.
pub trait CryptoProvider: Send + Sync {
    /// SHA-256 digest of `data`.
    fn sha256(&self, data: &[u8]) -> [u8; 32];

    /// Encrypts `plaintext` with AES-256-GCM, binding `aad` into the tag.
    fn aead_encrypt(
        &self,
        key: &AeadKey,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> PortResult<Vec<u8>>;

    /// Decrypts `ciphertext` (tag appended) and verifies the tag against
    /// `aad`. Any mutation of ciphertext or aad fails with
    /// `AuthenticationFailed`.
    fn aead_decrypt(
        &self,
        key: &AeadKey,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> PortResult<Vec<u8>>;
}

/// Production provider backed by `aes-gcm` and `sha2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcmCrypto;

impl CryptoProvider for GcmCrypto {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn aead_encrypt(
        &self,
        key: &AeadKey,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> PortResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| PortError::EncryptionFailed(e.to_string()))?;
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| PortError::EncryptionFailed(e.to_string()))
    }

    fn aead_decrypt(
        &self,
        key: &AeadKey,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> PortResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| PortError::EncryptionFailed(e.to_string()))?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| PortError::AuthenticationFailed)
    }
}

/// Generates a fresh random nonce from the OS CSPRNG.
pub fn random_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AeadKey {
        AeadKey::new([7u8; 32])
    }

    #[test]
    fn key_from_hex() {
        let hex = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        let key = AeadKey::from_hex(hex).unwrap();
        assert_eq!(key.as_bytes()[0], 0x00);
        assert_eq!(key.as_bytes()[31], 0xff);

        assert!(AeadKey::from_hex("deadbeef").is_err());
        assert!(AeadKey::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn aead_roundtrip() {
        let crypto = GcmCrypto;
        let key = test_key();
        let nonce = random_nonce();

        let ciphertext = crypto
            .aead_encrypt(&key, &nonce, b"tradewind/1", b"order book state")
            .unwrap();
        let plaintext = crypto
            .aead_decrypt(&key, &nonce, b"tradewind/1", &ciphertext)
            .unwrap();
        assert_eq!(plaintext, b"order book state");
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let crypto = GcmCrypto;
        let key = test_key();
        let nonce = random_nonce();

        let mut ciphertext = crypto
            .aead_encrypt(&key, &nonce, b"tradewind/1", b"payload")
            .unwrap();
        ciphertext[0] ^= 0x01;

        assert!(matches!(
            crypto.aead_decrypt(&key, &nonce, b"tradewind/1", &ciphertext),
            Err(PortError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_aad_rejected() {
        let crypto = GcmCrypto;
        let key = test_key();
        let nonce = random_nonce();

        let ciphertext = crypto
            .aead_encrypt(&key, &nonce, b"tradewind/1", b"payload")
            .unwrap();

        assert!(crypto
            .aead_decrypt(&key, &nonce, b"tradewind/2", &ciphertext)
            .is_err());
    }

    #[test]
    fn sha256_digest() {
        let crypto = GcmCrypto;
        let digest = crypto.sha256(b"");
        // SHA-256 of the empty string.
        assert_eq!(
            digest[..4],
            [0xe3, 0xb0, 0xc4, 0x42]
        );
    }
}
