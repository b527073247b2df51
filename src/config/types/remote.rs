//! Remote workspace configuration types

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Remote workspace (Databricks Apps) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Workspace URL, e.g. `https://example.cloud.databricks.com`
    #[serde(default)]
    pub host: Option<String>,
    /// Personal access token
    #[serde(skip_serializing, default = "default_secret")]
    pub token: SecretString,
    /// SQL warehouse the deployed app talks to
    #[serde(default)]
    pub warehouse_id: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            host: None,
            token: default_secret(),
            warehouse_id: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl RemoteConfig {
    /// Whether both host and token are present
    pub fn is_configured(&self) -> bool {
        use secrecy::ExposeSecret;
        self.host.as_deref().is_some_and(|h| !h.trim().is_empty())
            && !self.token.expose_secret().is_empty()
    }
}

fn default_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_timeout() -> u64 {
    120
}
