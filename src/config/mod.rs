use serde::Deserialize;
use std::path::PathBuf;
use strum::{Display, EnumString};

/// How the client asks the proxy to hand back compressed artifacts.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactMode {
    /// Download the bytes and keep them client side.
    #[default]
    Inline,
    /// Ask the proxy to persist the artifact and return a stable path.
    Server,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3001"). Unused by the CLI.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Server-side Tinify API key. When set, clients may omit their own.
    #[serde(default)]
    pub tinify_api_key: Option<String>,

    /// Upstream compression API base URL
    #[serde(default = "default_tinify_base_url")]
    pub tinify_base_url: String,

    /// Directory for server-side artifact persistence. Disabled when unset.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,

    /// Timeout applied to every outbound HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Base URL of the proxy server, as seen from the client
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,

    /// Directory holding the client's durable key-value state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub artifact_mode: ArtifactMode,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_tinify_base_url() -> String {
    "https://api.tinify.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_proxy_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".squeeze")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Self>().map(Self::normalized)
    }

    /// Build a config from explicit key/value pairs, as if read from the environment.
    pub fn from_iter<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars).map(Self::normalized)
    }

    /// The environment credential, if one is configured and non-empty.
    pub fn env_api_key(&self) -> Option<&str> {
        self.tinify_api_key.as_deref()
    }

    fn normalized(mut self) -> Self {
        if self
            .tinify_api_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            self.tinify_api_key = None;
        }
        self.tinify_base_url = self.tinify_base_url.trim_end_matches('/').to_string();
        self.proxy_url = self.proxy_url.trim_end_matches('/').to_string();
        self
    }
}
