//! Token encryption at rest.
//!
//! [`MachineScopedCipher`] binds stored tokens to the machine and OS user
//! that wrote them. It stops a token directory copied to another host from
//! being read back; it does not protect against a compromised account on the
//! same host.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, Result};

const NONCE_LEN: usize = 12;

// Mixed into every derived key so the key is never a bare hash of public facts
const ADDITIONAL_ENTROPY: &[u8] = b"restmcp-auth/token-store/v1";

/// Symmetric encryption for persisted token blobs
pub trait TokenCipher: Send + Sync {
    /// Encrypt a plaintext blob
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a blob produced by [`TokenCipher::encrypt`]
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM with a key derived from machine and user identity.
///
/// Output layout is `nonce(12) || ciphertext || tag(16)`.
pub struct MachineScopedCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for MachineScopedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineScopedCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl MachineScopedCipher {
    /// Derive the key for the current machine and user
    pub fn for_current_user() -> Self {
        let home = dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_identity(&machine_id(), &user_name(), &home)
    }

    /// Derive the key from explicit identity parts
    pub fn from_identity(machine_id: &str, user: &str, home: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [ADDITIONAL_ENTROPY, machine_id.as_bytes(), user.as_bytes(), home.as_bytes()] {
            // length-prefix each part so ("ab","c") and ("a","bc") differ
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        let key = hasher.finalize();
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }
}

impl TokenCipher for MachineScopedCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| AuthError::Cipher)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(AuthError::Cipher);
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| AuthError::Cipher)
    }
}

fn machine_id() -> String {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = std::fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    host_name()
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .unwrap_or_default()
}

fn user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}
