/// Passphrase-derived keystore (spec.md §4.3).
///
/// Replaces the teacher's Argon2 `encrypted_key_manager.rs` with a
/// PBKDF2-HMAC-SHA256 derivation, as the spec calls for; keeps the same
/// shape — a retention record persisted next to the vault, and a key that
/// never touches disk.
use crate::cipher::{self, CipherAlgorithm, FileKey};
use crate::error::{DecentralisError, DecentralisResult};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const DEFAULT_ITERATIONS: u32 = 200_000;
const MIN_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const VERIFY_PLAINTEXT: &[u8] = b"decentralis-verification";

/// Persisted alongside the vault; holds everything needed to re-derive the
/// key from a passphrase and confirm it's the right one, but never the
/// passphrase or key itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionRecord {
    pub version: u32,
    pub kdf: String,
    pub salt: String,
    pub iterations: u32,
    pub algorithm: CipherAlgorithm,
    /// `nonce || AEAD-ciphertext` of a known plaintext, under the derived key.
    pub verify: String,
}

fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> FileKey {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut out);
    FileKey(out)
}

/// Derive a fresh key from `passphrase` and produce the retention record to
/// persist. `iterations` must be >= 100_000; pass `None` for the spec default.
pub fn generate_retention(
    passphrase: &str,
    algorithm: CipherAlgorithm,
    iterations: Option<u32>,
) -> DecentralisResult<(FileKey, RetentionRecord)> {
    let iterations = iterations.unwrap_or(DEFAULT_ITERATIONS);
    if iterations < MIN_ITERATIONS {
        return Err(DecentralisError::Configuration(format!(
            "pbkdf2 iterations must be >= {MIN_ITERATIONS}"
        )));
    }

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let key = derive_key(passphrase, &salt, iterations);
    let verify_wire = cipher::encrypt(algorithm, &key, VERIFY_PLAINTEXT)?;

    let record = RetentionRecord {
        version: 1,
        kdf: "pbkdf2".to_string(),
        salt: hex::encode(salt),
        iterations,
        algorithm,
        verify: hex::encode(verify_wire),
    };

    Ok((key, record))
}

/// Re-derive the key from `passphrase` and `record`, confirming it against
/// the record's verify blob. Fails with `WrongPassphrase` on mismatch.
/// Returns the 64-character hex key (spec.md §4.3/§8 scenario 4); callers
/// that need the raw bytes decode it back with `FileKey::from_hex`.
pub fn verify_passphrase(passphrase: &str, record: &RetentionRecord) -> DecentralisResult<String> {
    let salt = hex::decode(&record.salt)
        .map_err(|e| DecentralisError::Configuration(format!("corrupt retention salt: {e}")))?;
    let verify_wire = hex::decode(&record.verify)
        .map_err(|e| DecentralisError::Configuration(format!("corrupt retention verify blob: {e}")))?;

    let key = derive_key(passphrase, &salt, record.iterations);

    match cipher::decrypt(record.algorithm, &key, &verify_wire) {
        Ok(plaintext) if plaintext == VERIFY_PLAINTEXT => Ok(key.to_hex()),
        _ => Err(DecentralisError::WrongPassphrase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_passphrase_verifies() {
        let (key, record) = generate_retention("correct horse battery staple", CipherAlgorithm::Aes256Gcm, None).unwrap();
        let recovered = verify_passphrase("correct horse battery staple", &record).unwrap();
        assert_eq!(recovered.len(), 64);
        assert_eq!(key.0, FileKey::from_hex(&recovered).unwrap().0);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let (_key, record) = generate_retention("correct horse battery staple", CipherAlgorithm::Aes256Gcm, None).unwrap();
        let result = verify_passphrase("wrong passphrase", &record);
        assert!(matches!(result, Err(DecentralisError::WrongPassphrase)));
    }

    #[test]
    fn verify_is_idempotent() {
        let (_key, record) = generate_retention("another passphrase", CipherAlgorithm::ChaCha20Poly1305, None).unwrap();
        let first = verify_passphrase("another passphrase", &record).unwrap();
        let second = verify_passphrase("another passphrase", &record).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_iteration_count_below_minimum() {
        let result = generate_retention("passphrase", CipherAlgorithm::Aes256Gcm, Some(1000));
        assert!(matches!(result, Err(DecentralisError::Configuration(_))));
    }

    #[test]
    fn record_never_contains_passphrase_or_key() {
        let (key, record) = generate_retention("super secret phrase", CipherAlgorithm::Aes256Gcm, None).unwrap();
        let serialized = serde_json::to_string(&record).unwrap();
        assert!(!serialized.contains("super secret phrase"));
        assert!(!serialized.contains(&hex::encode(key.0)));
    }
}
