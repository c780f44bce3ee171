//! Provider credentials: where they come from and the process-scoped cache that
//! holds them between startup and shutdown. Nothing here is ever persisted.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::ProviderId;

/// Opaque secret; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential source unavailable: {0}")]
    Unavailable(String),
}

/// Supplies credentials per provider. `Ok(None)` means the provider needs none
/// or none is configured.
pub trait CredentialSource: Send + Sync {
    fn credential<'a>(
        &'a self,
        provider: ProviderId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Credential>, CredentialError>> + Send + 'a>>;
}

/// Fixed credentials, mainly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<ProviderId, Credential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: ProviderId, secret: impl Into<String>) -> Self {
        self.entries.insert(provider, Credential::new(secret));
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn credential<'a>(
        &'a self,
        provider: ProviderId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Credential>, CredentialError>> + Send + 'a>>
    {
        let credential = self.entries.get(&provider).cloned();
        Box::pin(async move { Ok(credential) })
    }
}

/// Reads `FERROQUANT_<PROVIDER>_API_KEY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    pub fn variable_for(provider: ProviderId) -> String {
        format!("FERROQUANT_{}_API_KEY", provider.env_name())
    }
}

impl CredentialSource for EnvCredentials {
    fn credential<'a>(
        &'a self,
        provider: ProviderId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Credential>, CredentialError>> + Send + 'a>>
    {
        let credential = std::env::var(Self::variable_for(provider))
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(Credential::new);
        Box::pin(async move { Ok(credential) })
    }
}

/// Credentials loaded once at startup and dropped at shutdown.
#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: RwLock<HashMap<ProviderId, Credential>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads credentials for `providers`, replacing anything held before.
    /// Returns how many providers received a credential.
    pub async fn initialize(
        &self,
        source: &dyn CredentialSource,
        providers: &[ProviderId],
    ) -> Result<usize, CredentialError> {
        let mut loaded = HashMap::with_capacity(providers.len());
        for provider in providers {
            if let Some(credential) = source.credential(*provider).await? {
                loaded.insert(*provider, credential);
            }
        }

        let count = loaded.len();
        *self.entries.write().await = loaded;
        tracing::debug!(providers = count, "credential cache initialized");
        Ok(count)
    }

    pub async fn get(&self, provider: ProviderId) -> Option<Credential> {
        self.entries.read().await.get(&provider).cloned()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        tracing::debug!("credential cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_then_clear() {
        let source = StaticCredentials::new()
            .with(ProviderId::Polygon, "poly-key")
            .with(ProviderId::Alphavantage, "av-key");
        let cache = CredentialCache::new();

        let loaded = cache
            .initialize(&source, &ProviderId::ALL)
            .await
            .expect("static source never fails");
        assert_eq!(loaded, 2);
        assert_eq!(
            cache.get(ProviderId::Polygon).await.map(|c| c.expose().to_owned()),
            Some(String::from("poly-key"))
        );
        assert!(cache.get(ProviderId::Yahoo).await.is_none());

        cache.clear().await;
        assert_eq!(cache.len().await, 0);
        assert!(cache.get(ProviderId::Polygon).await.is_none());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("hunter2");
        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
    }

    #[test]
    fn env_variable_names_follow_convention() {
        assert_eq!(
            EnvCredentials::variable_for(ProviderId::Alphavantage),
            "FERROQUANT_ALPHAVANTAGE_API_KEY"
        );
    }
}
