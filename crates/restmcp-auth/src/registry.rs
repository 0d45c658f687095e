//! Provider registry
//!
//! Shared, concurrently readable list of OAuth provider configurations.
//! Constructed explicitly and passed around as `Arc<OAuthProviderRegistry>`.

use parking_lot::RwLock;

use crate::config::OAuthProviderConfig;

/// Registered OAuth providers, keyed by name
#[derive(Debug, Default)]
pub struct OAuthProviderRegistry {
    providers: RwLock<Vec<OAuthProviderConfig>>,
}

impl OAuthProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `providers`
    pub fn from_configs(providers: impl IntoIterator<Item = OAuthProviderConfig>) -> Self {
        let registry = Self::new();
        for provider in providers {
            registry.register(provider);
        }
        registry
    }

    /// Add or replace a provider. Returns the configuration it replaced.
    pub fn register(&self, provider: OAuthProviderConfig) -> Option<OAuthProviderConfig> {
        let mut providers = self.providers.write();
        match providers.iter_mut().find(|p| p.name == provider.name) {
            Some(existing) => Some(std::mem::replace(existing, provider)),
            None => {
                providers.push(provider);
                None
            }
        }
    }

    /// Remove a provider
    pub fn remove(&self, name: &str) -> Option<OAuthProviderConfig> {
        let mut providers = self.providers.write();
        let index = providers.iter().position(|p| p.name == name)?;
        Some(providers.remove(index))
    }

    /// Provider configuration by name
    pub fn get(&self, name: &str) -> Option<OAuthProviderConfig> {
        self.providers.read().iter().find(|p| p.name == name).cloned()
    }

    /// Registered provider names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.providers.read().iter().map(|p| p.name.clone()).collect()
    }

    /// Every scope key declared across all providers, deduplicated
    pub fn declared_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();
        for provider in self.providers.read().iter() {
            for scope in provider.scopes.keys() {
                if !scopes.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
                    scopes.push(scope.clone());
                }
            }
        }
        scopes
    }

    /// Number of providers
    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    /// Whether no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}
