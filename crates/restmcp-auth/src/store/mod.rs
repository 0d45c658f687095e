//! Token persistence
//!
//! Strategies read and write tokens through the [`TokenStore`] contract,
//! keyed by `(session_key, provider_name)`. Two implementations ship:
//!
//! - [`MemoryTokenStore`] - process-local, for tests and single-process use
//! - [`FileTokenStore`] - one encrypted file per session and provider
//!
//! A read never fails hard: unreadable or undecryptable entries come back as
//! [`TokenLookup::Invalid`] and callers treat them as missing.

mod cipher;
mod file;

pub use cipher::{MachineScopedCipher, TokenCipher};
pub use file::FileTokenStore;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::token::TokenData;

/// Outcome of a token store read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    /// A decodable token exists
    Found(TokenData),
    /// Nothing stored for this key
    Missing,
    /// An entry exists but could not be read back
    Invalid(String),
}

impl TokenLookup {
    /// Collapse to an option, dropping the reason for invalid entries
    pub fn into_option(self) -> Option<TokenData> {
        match self {
            Self::Found(token) => Some(token),
            Self::Missing | Self::Invalid(_) => None,
        }
    }
}

/// Persistence contract for tokens
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read the token for a session and provider
    async fn get(&self, session_key: &str, provider_name: &str) -> TokenLookup;

    /// Store a token, replacing any previous value
    async fn save(&self, session_key: &str, provider_name: &str, token: TokenData) -> Result<()>;

    /// Remove a token. Removing an absent token succeeds.
    async fn delete(&self, session_key: &str, provider_name: &str) -> Result<()>;
}

/// In-memory token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<(String, String), TokenData>,
}

impl MemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, session_key: &str, provider_name: &str) -> TokenLookup {
        match self
            .tokens
            .get(&(session_key.to_string(), provider_name.to_string()))
        {
            Some(entry) => TokenLookup::Found(entry.value().clone()),
            None => TokenLookup::Missing,
        }
    }

    async fn save(&self, session_key: &str, provider_name: &str, token: TokenData) -> Result<()> {
        self.tokens
            .insert((session_key.to_string(), provider_name.to_string()), token);
        Ok(())
    }

    async fn delete(&self, session_key: &str, provider_name: &str) -> Result<()> {
        self.tokens
            .remove(&(session_key.to_string(), provider_name.to_string()));
        Ok(())
    }
}
