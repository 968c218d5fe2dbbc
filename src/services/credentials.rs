//! Credential Resolver: an ordered list of strategies, first hit wins.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::models::credential::{Credential, Provenance};
use crate::services::companion::CompanionClient;
use crate::services::kv::{KeyValueStore, StoreError};

pub const CREDENTIAL_KEY: &str = "tinypng-api-key";

/// One place a credential may come from.
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when this source has nothing to offer. Failures degrade to `None`.
    fn lookup(&self) -> BoxFuture<'_, Option<Credential>>;
}

/// Asks the proxy whether it has a key configured server side.
pub struct ServerEnvironmentSource {
    companion: Arc<CompanionClient>,
}

impl ServerEnvironmentSource {
    pub fn new(companion: Arc<CompanionClient>) -> Self {
        Self { companion }
    }
}

impl CredentialSource for ServerEnvironmentSource {
    fn name(&self) -> &'static str {
        "server-environment"
    }

    fn lookup(&self) -> BoxFuture<'_, Option<Credential>> {
        Box::pin(async move {
            match self.companion.key_status().await {
                Ok(status) if status.configured && status.source == Some(Provenance::Environment) => {
                    Some(Credential::environment())
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(error = %e, "Server key lookup failed, falling back");
                    None
                }
            }
        })
    }
}

/// A key saved by the user in a previous session.
pub struct StoredSource {
    store: Arc<dyn KeyValueStore>,
}

impl StoredSource {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl CredentialSource for StoredSource {
    fn name(&self) -> &'static str {
        "stored-local"
    }

    fn lookup(&self) -> BoxFuture<'_, Option<Credential>> {
        Box::pin(async move {
            match self.store.get(CREDENTIAL_KEY) {
                Ok(Some(secret)) if !secret.trim().is_empty() => {
                    Some(Credential::stored(secret.trim()))
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "Stored credential unreadable");
                    None
                }
            }
        })
    }
}

/// Outcome of submitting user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(Credential),
    /// Empty input means "let me edit the key", not "clear it".
    EditMode,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to persist credential: {0}")]
    Store(#[from] StoreError),

    #[error("the active credential is configured on the server and cannot be overridden")]
    NotOverridable,
}

pub struct CredentialResolver {
    sources: Vec<Box<dyn CredentialSource>>,
    store: Arc<dyn KeyValueStore>,
}

impl CredentialResolver {
    pub fn new(sources: Vec<Box<dyn CredentialSource>>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { sources, store }
    }

    /// Server environment first, then the locally stored key.
    pub fn standard(companion: Arc<CompanionClient>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(
            vec![
                Box::new(ServerEnvironmentSource::new(companion)),
                Box::new(StoredSource::new(store.clone())),
            ],
            store,
        )
    }

    /// Try each source in order. `None` means the caller must ask the user.
    pub async fn resolve(&self) -> Option<Credential> {
        for source in &self.sources {
            if let Some(credential) = source.lookup().await {
                tracing::info!(
                    source = source.name(),
                    provenance = %credential.provenance(),
                    "Credential resolved"
                );
                return Some(credential);
            }
        }
        tracing::info!("No credential available, user input required");
        None
    }

    /// Persist a user-entered key for future resolutions.
    pub fn save(
        &self,
        active: Option<&Credential>,
        input: &str,
    ) -> Result<SaveOutcome, CredentialError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(SaveOutcome::EditMode);
        }
        if active.is_some_and(|c| !c.is_user_overridable()) {
            return Err(CredentialError::NotOverridable);
        }
        self.store.set(CREDENTIAL_KEY, input)?;
        tracing::info!(provenance = %Provenance::UserInput, "Credential saved");
        Ok(SaveOutcome::Saved(Credential::user_input(input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv::MemoryStore;

    struct Fixed(Option<Credential>);

    impl CredentialSource for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn lookup(&self) -> BoxFuture<'_, Option<Credential>> {
            Box::pin(async move { self.0.clone() })
        }
    }

    fn resolver_with(env: Option<Credential>, stored: Option<&str>) -> CredentialResolver {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        if let Some(secret) = stored {
            store.set(CREDENTIAL_KEY, secret).unwrap();
        }
        CredentialResolver::new(
            vec![
                Box::new(Fixed(env)),
                Box::new(StoredSource::new(store.clone())),
            ],
            store,
        )
    }

    #[tokio::test]
    async fn test_environment_short_circuits() {
        let resolver = resolver_with(Some(Credential::environment()), Some("local-key"));
        let credential = resolver.resolve().await.unwrap();
        assert_eq!(credential.provenance(), Provenance::Environment);
        assert!(credential.secret().is_none());
    }

    #[tokio::test]
    async fn test_stored_key_used_when_no_environment() {
        let resolver = resolver_with(None, Some("local-key"));
        let credential = resolver.resolve().await.unwrap();
        assert_eq!(credential.provenance(), Provenance::StoredLocal);
        assert_eq!(credential.secret(), Some("local-key"));
    }

    #[test]
    fn test_nothing_available() {
        let resolver = resolver_with(None, None);
        assert!(tokio_test::block_on(resolver.resolve()).is_none());
    }

    #[tokio::test]
    async fn test_save_persists_for_next_resolution() {
        let resolver = resolver_with(None, None);
        let outcome = resolver.save(None, "  new-key ").unwrap();
        assert_eq!(outcome, SaveOutcome::Saved(Credential::user_input("new-key")));

        let credential = resolver.resolve().await.unwrap();
        assert_eq!(credential.provenance(), Provenance::StoredLocal);
        assert_eq!(credential.secret(), Some("new-key"));
    }

    #[tokio::test]
    async fn test_empty_input_enters_edit_mode() {
        let resolver = resolver_with(None, Some("kept"));
        let active = resolver.resolve().await;
        assert_eq!(resolver.save(active.as_ref(), "   ").unwrap(), SaveOutcome::EditMode);
        assert_eq!(resolver.resolve().await.unwrap().secret(), Some("kept"));
    }

    #[tokio::test]
    async fn test_environment_cannot_be_overridden() {
        let resolver = resolver_with(Some(Credential::environment()), None);
        let active = resolver.resolve().await;
        assert!(matches!(
            resolver.save(active.as_ref(), "mine"),
            Err(CredentialError::NotOverridable)
        ));
    }

    #[test]
    fn test_empty_input_is_edit_mode_even_for_environment() {
        let resolver = resolver_with(Some(Credential::environment()), None);
        let outcome = resolver.save(Some(&Credential::environment()), "");
        assert!(matches!(outcome, Ok(SaveOutcome::EditMode)));
    }
}
