use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Where the active API credential came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Provenance {
    /// Configured on the proxy server; the secret never reaches the client.
    Environment,
    /// Read back from durable local storage.
    StoredLocal,
    /// Just entered by the user (and persisted for next time).
    UserInput,
}

/// The active API credential plus its provenance.
///
/// An `Environment` credential has no client-side secret: requests leave
/// the `Authorization` header off and the proxy injects its own key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: Option<String>,
    provenance: Provenance,
}

impl Credential {
    pub fn environment() -> Self {
        Self {
            secret: None,
            provenance: Provenance::Environment,
        }
    }

    pub fn stored(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            provenance: Provenance::StoredLocal,
        }
    }

    pub fn user_input(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            provenance: Provenance::UserInput,
        }
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Whether the user may replace this credential with their own.
    pub fn is_user_overridable(&self) -> bool {
        self.provenance != Provenance::Environment
    }

    /// Masked form suitable for display, e.g. `abcd…wxyz`.
    pub fn masked(&self) -> String {
        match &self.secret {
            None => "(configured on server)".to_string(),
            Some(secret) if secret.chars().count() <= 8 => "*".repeat(secret.chars().count()),
            Some(secret) => {
                let head: String = secret.chars().take(4).collect();
                let tail: String = secret
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("{head}…{tail}")
            }
        }
    }
}

// Keep secrets out of logs and panic messages.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("provenance", &self.provenance)
            .finish()
    }
}
