/// Whole-file AEAD cipher (spec.md §4.2).
///
/// Wire format: `nonce(12B) || ciphertext+tag`. Grounded on the AEAD wrapper
/// style in `willief-communitas/src-tauri/src/secure_fec.rs` (random nonce
/// per call, failure collapsed to a single opaque error so a tampered
/// ciphertext never yields partial plaintext).
use crate::error::{DecentralisError, DecentralisResult};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};

const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherAlgorithm {
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// A 32-byte symmetric key. Never serialized; held only in memory for the
/// lifetime of the operation that needs it.
#[derive(Clone)]
pub struct FileKey(pub [u8; 32]);

impl FileKey {
    /// 64-character lowercase hex encoding, the wire form callers outside
    /// the cipher/keystore boundary are handed (spec.md §4.3/§8).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_key: &str) -> DecentralisResult<Self> {
        let bytes = hex::decode(hex_key).map_err(|e| DecentralisError::InvalidKeyOrCipher(format!("bad hex key: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DecentralisError::InvalidKeyOrCipher("key must be 32 bytes".to_string()))?;
        Ok(FileKey(array))
    }
}

pub fn encrypt(algorithm: CipherAlgorithm, key: &FileKey, plaintext: &[u8]) -> DecentralisResult<Vec<u8>> {
    match algorithm {
        CipherAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| DecentralisError::InvalidKeyOrCipher(e.to_string()))?;
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            let ciphertext = cipher
                .encrypt(&nonce, plaintext)
                .map_err(|_| DecentralisError::InvalidKeyOrCipher("encryption failed".to_string()))?;
            Ok(assemble(&nonce, &ciphertext))
        }
        CipherAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| DecentralisError::InvalidKeyOrCipher(e.to_string()))?;
            let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
            let ciphertext = cipher
                .encrypt(&nonce, plaintext)
                .map_err(|_| DecentralisError::InvalidKeyOrCipher("encryption failed".to_string()))?;
            Ok(assemble(&nonce, &ciphertext))
        }
    }
}

pub fn decrypt(algorithm: CipherAlgorithm, key: &FileKey, wire: &[u8]) -> DecentralisResult<Vec<u8>> {
    if wire.len() < NONCE_LEN {
        return Err(DecentralisError::InvalidKeyOrCipher(
            "ciphertext shorter than nonce".to_string(),
        ));
    }
    let (nonce_bytes, ciphertext) = wire.split_at(NONCE_LEN);

    match algorithm {
        CipherAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| DecentralisError::InvalidKeyOrCipher(e.to_string()))?;
            let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);
            cipher
                .decrypt(nonce, ciphertext)
                .map_err(|_| DecentralisError::InvalidKeyOrCipher("decryption failed".to_string()))
        }
        CipherAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| DecentralisError::InvalidKeyOrCipher(e.to_string()))?;
            let nonce = chacha20poly1305::Nonce::from_slice(nonce_bytes);
            cipher
                .decrypt(nonce, ciphertext)
                .map_err(|_| DecentralisError::InvalidKeyOrCipher("decryption failed".to_string()))
        }
    }
}

fn assemble(nonce: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    wire.extend_from_slice(nonce);
    wire.extend_from_slice(ciphertext);
    wire
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FileKey {
        FileKey([7u8; 32])
    }

    #[test]
    fn aes_gcm_round_trips() {
        let plaintext = b"the vault contains a file";
        let wire = encrypt(CipherAlgorithm::Aes256Gcm, &key(), plaintext).unwrap();
        let recovered = decrypt(CipherAlgorithm::Aes256Gcm, &key(), &wire).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn chacha20poly1305_round_trips() {
        let plaintext = b"a different payload entirely";
        let wire = encrypt(CipherAlgorithm::ChaCha20Poly1305, &key(), plaintext).unwrap();
        let recovered = decrypt(CipherAlgorithm::ChaCha20Poly1305, &key(), &wire).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let plaintext = b"do not tamper with this";
        let mut wire = encrypt(CipherAlgorithm::Aes256Gcm, &key(), plaintext).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        let result = decrypt(CipherAlgorithm::Aes256Gcm, &key(), &wire);
        assert!(matches!(result, Err(DecentralisError::InvalidKeyOrCipher(_))));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let plaintext = b"secret contents";
        let wire = encrypt(CipherAlgorithm::Aes256Gcm, &key(), plaintext).unwrap();
        let wrong = FileKey([9u8; 32]);
        let result = decrypt(CipherAlgorithm::Aes256Gcm, &wrong, &wire);
        assert!(result.is_err());
    }

    #[test]
    fn nonces_differ_across_calls() {
        let plaintext = b"same plaintext twice";
        let wire1 = encrypt(CipherAlgorithm::Aes256Gcm, &key(), plaintext).unwrap();
        let wire2 = encrypt(CipherAlgorithm::Aes256Gcm, &key(), plaintext).unwrap();
        assert_ne!(&wire1[..12], &wire2[..12]);
    }
}
