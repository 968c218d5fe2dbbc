use std::sync::Arc;

use crate::services::{artifacts::ArtifactStore, tinify::TinifyClient};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub tinify: Arc<TinifyClient>,
    pub artifacts: Option<Arc<ArtifactStore>>,
    env_api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        tinify: TinifyClient,
        artifacts: Option<ArtifactStore>,
        env_api_key: Option<String>,
    ) -> Self {
        Self {
            tinify: Arc::new(tinify),
            artifacts: artifacts.map(Arc::new),
            env_api_key: env_api_key
                .filter(|key| !key.trim().is_empty())
                .map(Arc::from),
        }
    }

    /// The server-side credential. Handlers use it only as a fallback.
    pub fn env_api_key(&self) -> Option<&str> {
        self.env_api_key.as_deref()
    }
}
