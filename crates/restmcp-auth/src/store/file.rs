//! Encrypted file-backed token store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::cipher::{MachineScopedCipher, TokenCipher};
use super::{TokenLookup, TokenStore};
use crate::context::session_tag;
use crate::error::Result;
use crate::token::TokenData;

/// Stores each `(session, provider)` token in its own encrypted file.
///
/// Layout: `<root>/<sha256-hex(session_key)>/<sanitised provider>.token`.
/// Writes go through a temporary file and a rename, so concurrent writers to
/// the same file resolve as last-writer-wins and readers never see a torn
/// file.
#[derive(Clone)]
pub struct FileTokenStore {
    root: PathBuf,
    cipher: Arc<dyn TokenCipher>,
}

impl std::fmt::Debug for FileTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTokenStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FileTokenStore {
    /// Store under `root` using the machine-scoped cipher
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_cipher(root, Arc::new(MachineScopedCipher::for_current_user()))
    }

    /// Store under `root` with a custom cipher
    pub fn with_cipher(root: impl Into<PathBuf>, cipher: Arc<dyn TokenCipher>) -> Self {
        Self {
            root: root.into(),
            cipher,
        }
    }

    /// `<data-local-dir>/restmcp/tokens`, when the platform has such a directory
    pub fn default_root() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("restmcp").join("tokens"))
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that holds the token for `(session_key, provider_name)`
    pub fn path_for(&self, session_key: &str, provider_name: &str) -> PathBuf {
        let session_dir = format!("{:x}", Sha256::digest(session_key.as_bytes()));
        self.root
            .join(session_dir)
            .join(format!("{}.token", sanitize_provider(provider_name)))
    }
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`, and never start
/// with `.` so the name cannot resolve to `.` or `..`.
fn sanitize_provider(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with('.') {
        out.replace_range(..out.chars().next().map_or(0, char::len_utf8), "_");
    }
    out
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self, session_key: &str, provider_name: &str) -> TokenLookup {
        let path = self.path_for(session_key, provider_name);
        let sealed = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return TokenLookup::Missing,
            Err(e) => {
                warn!(provider = provider_name, session = %session_tag(session_key), error = %e, "Token file unreadable");
                return TokenLookup::Invalid(format!("unreadable token file: {}", e.kind()));
            }
        };

        let Ok(plaintext) = self.cipher.decrypt(&sealed) else {
            warn!(provider = provider_name, session = %session_tag(session_key), "Token file could not be decrypted");
            return TokenLookup::Invalid("token file could not be decrypted".to_string());
        };

        match serde_json::from_slice::<TokenData>(&plaintext) {
            Ok(token) => TokenLookup::Found(token),
            Err(_) => {
                warn!(provider = provider_name, session = %session_tag(session_key), "Token file holds malformed JSON");
                TokenLookup::Invalid("token file is corrupt".to_string())
            }
        }
    }

    async fn save(&self, session_key: &str, provider_name: &str, token: TokenData) -> Result<()> {
        let path = self.path_for(session_key, provider_name);
        let Some(dir) = path.parent() else {
            return Err(std::io::Error::other("token path has no parent directory").into());
        };
        tokio::fs::create_dir_all(dir).await?;

        let plaintext = serde_json::to_vec(&token).map_err(std::io::Error::other)?;
        let sealed = self.cipher.encrypt(&plaintext)?;

        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &sealed).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(provider = provider_name, session = %session_tag(session_key), "Token persisted");
        Ok(())
    }

    async fn delete(&self, session_key: &str, provider_name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(session_key, provider_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileTokenStore {
        FileTokenStore::with_cipher(
            dir.path(),
            Arc::new(MachineScopedCipher::from_identity("m", "u", "/h")),
        )
    }

    #[test]
    fn test_sanitize_provider() {
        assert_eq!(sanitize_provider("github"), "github");
        assert_eq!(sanitize_provider("my provider/v2"), "my_provider_v2");
        assert_eq!(sanitize_provider(".."), "_.");
        assert_eq!(sanitize_provider("."), "_");
        assert_eq!(sanitize_provider(""), "_");
    }

    #[test]
    fn test_path_layout() {
        let dir = TempDir::new().unwrap();
        let path = store(&dir).path_for("h1", "../etc");
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.file_name().unwrap(), "_._etc.token");
        let session_dir = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(session_dir.len(), 64);
        assert!(session_dir.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let token = TokenData::new("at").with_refresh_token("rt").with_expires_in(3600);

        assert_eq!(store.get("s", "p").await, TokenLookup::Missing);
        store.save("s", "p", token.clone()).await.unwrap();
        assert_eq!(store.get("s", "p").await, TokenLookup::Found(token));

        store.delete("s", "p").await.unwrap();
        assert_eq!(store.get("s", "p").await, TokenLookup::Missing);
        store.delete("s", "p").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_is_not_plaintext() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save("s", "p", TokenData::new("very-secret")).await.unwrap();

        let raw = std::fs::read(store.path_for("s", "p")).unwrap();
        let plaintext = serde_json::to_vec(&TokenData::new("very-secret")).unwrap();
        assert_ne!(raw, plaintext);
        assert!(!String::from_utf8_lossy(&raw).contains("very-secret"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_invalid_not_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.path_for("s", "p");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"garbage").unwrap();

        assert!(matches!(store.get("s", "p").await, TokenLookup::Invalid(_)));
    }

    #[tokio::test]
    async fn test_foreign_key_is_invalid() {
        let dir = TempDir::new().unwrap();
        store(&dir).save("s", "p", TokenData::new("at")).await.unwrap();

        let other = FileTokenStore::with_cipher(
            dir.path(),
            Arc::new(MachineScopedCipher::from_identity("other", "u", "/h")),
        );
        assert!(matches!(other.get("s", "p").await, TokenLookup::Invalid(_)));
    }
}
