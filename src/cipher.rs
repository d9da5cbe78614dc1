use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64;
use rand_core::OsRng;
use rand_core::TryRngCore;

use crate::error::SessionError;

pub(crate) const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Raw AES-256 key material. Losing the key file makes every stored secret unreadable.
#[derive(Clone)]
pub(crate) struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub(crate) fn generate() -> Result<Self, SessionError> {
        let mut bytes = [0u8; KEY_LEN];
        let mut rng = OsRng;
        rng.try_fill_bytes(&mut bytes)
            .map_err(|err| SessionError::InvalidKey(format!("random key failed: {err:?}")))?;
        Ok(Self(bytes))
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            SessionError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, found {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Reads the key at `path`, or generates and persists one if the file is absent.
    /// An existing key is never replaced.
    pub(crate) fn load_or_create(path: &Path) -> Result<Self, SessionError> {
        if path.exists() {
            let bytes = fs::read(path)?;
            let key = Self::from_bytes(&bytes)?;
            tracing::debug!(path = %path.display(), "loaded encryption key");
            return Ok(key);
        }

        let key = Self::generate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_key_file(path, &key.0)?;
        tracing::info!(path = %path.display(), "generated new encryption key");
        Ok(key)
    }
}

/// Creates the key file owner-only from the first byte written.
#[cfg(unix)]
fn write_key_file(path: &Path, key: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(key)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_key_file(path: &Path, key: &[u8]) -> std::io::Result<()> {
    tracing::warn!(
        path = %path.display(),
        "owner-only key file permissions are not available on this platform"
    );
    fs::write(path, key)
}

#[derive(Clone)]
pub(crate) struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub(crate) fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
        }
    }

    #[cfg(test)]
    pub(crate) fn generate() -> Self {
        Self::new(&EncryptionKey::generate().unwrap())
    }

    /// Returns `base64(nonce || ciphertext)`; empty input stays empty.
    pub(crate) fn encrypt(&self, plaintext: &str) -> Result<String, SessionError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let mut nonce_bytes = [0u8; NONCE_LEN];
        let mut rng = OsRng;
        rng.try_fill_bytes(&mut nonce_bytes)
            .map_err(|err| SessionError::UnknownFailure(format!("random nonce failed: {err:?}")))?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|err| SessionError::UnknownFailure(format!("encrypt failed: {err:?}")))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(Base64.encode(blob))
    }

    pub(crate) fn decrypt(&self, ciphertext: &str) -> Result<String, SessionError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }
        let blob = Base64
            .decode(ciphertext.trim())
            .map_err(|err| SessionError::Decryption(format!("decode ciphertext: {err}")))?;
        if blob.len() <= NONCE_LEN {
            return Err(SessionError::Decryption("ciphertext too short".to_string()));
        }
        let (nonce_bytes, body) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| SessionError::Decryption("ciphertext rejected by key".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|err| SessionError::Decryption(format!("decode utf8: {err}")))
    }
}
