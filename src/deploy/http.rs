//! Databricks Apps REST client

use async_trait::async_trait;
use base64::Engine;
use reqwest::{header, Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use walkdir::WalkDir;

use super::remote::{AppInfo, DeploymentInfo, RemoteTarget, UserInfo};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};

/// [`RemoteTarget`] backed by the Databricks workspace REST API
#[derive(Clone)]
pub struct HttpRemoteTarget {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct MeResponse {
    #[serde(rename = "userName")]
    user_name: String,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct DeploymentResponse {
    deployment_id: String,
    #[serde(default)]
    status: Option<DeploymentStatus>,
}

#[derive(Deserialize)]
struct DeploymentStatus {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpRemoteTarget {
    /// Create a client for the workspace at `host`
    pub fn new(host: &str, token: &SecretString, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(host)
            .map_err(|e| Error::Config(format!("Invalid workspace URL {}: {}", host, e)))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| Error::Config(format!("Invalid token format: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(HttpRemoteTarget {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Create a client from the `remote` config section
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(Error::Config(
                "remote workspace not configured; set DATABRICKS_HOST and DATABRICKS_TOKEN"
                    .to_string(),
            ));
        }
        let host = config.host.as_deref().unwrap_or_default();
        Self::new(host, &config.token, Duration::from_secs(config.timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-success response to [`Error::RemoteApi`]
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiError>(&body) {
            Ok(ApiError {
                error_code: Some(code),
                message: Some(message),
            }) => format!("{}: {}", code, message),
            Ok(ApiError {
                message: Some(message),
                ..
            }) => message,
            _ => body,
        };
        Err(Error::RemoteApi {
            status: status.as_u16(),
            message,
        })
    }

    async fn mkdirs(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/2.0/workspace/mkdirs"))
            .json(&json!({ "path": path }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn import_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/2.0/workspace/import"))
            .json(&json!({
                "path": path,
                "format": "AUTO",
                "overwrite": true,
                "content": base64::engine::general_purpose::STANDARD.encode(content),
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteTarget for HttpRemoteTarget {
    async fn current_user(&self) -> Result<UserInfo> {
        let response = self
            .client
            .get(self.url("/api/2.0/preview/scim/v2/Me"))
            .send()
            .await?;
        let me: MeResponse = Self::check(response).await?.json().await?;
        Ok(UserInfo {
            user_name: me.user_name,
        })
    }

    async fn get_app(&self, name: &str) -> Result<Option<AppInfo>> {
        let response = self
            .client
            .get(self.url(&format!("/api/2.0/apps/{}", name)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let app: AppInfo = Self::check(response).await?.json().await?;
        Ok(Some(app))
    }

    async fn create_app(&self, name: &str, description: &str) -> Result<AppInfo> {
        debug!(app = name, "Creating app");
        let response = self
            .client
            .post(self.url("/api/2.0/apps"))
            .json(&json!({ "name": name, "description": description }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn sync_directory(
        &self,
        local: &Path,
        remote_path: &str,
        excluded_dirs: &[String],
    ) -> Result<usize> {
        let remote_root = remote_path.trim_end_matches('/');
        self.mkdirs(remote_root).await?;

        let walker = WalkDir::new(local)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir() && excluded_dirs.iter().any(|d| *d == name))
                    && !name.starts_with(".appforge")
            });

        let mut uploaded = 0;
        for entry in walker {
            let entry = entry?;
            let Ok(relative) = entry.path().strip_prefix(local) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let target = format!("{}/{}", remote_root, relative);

            if entry.file_type().is_dir() {
                self.mkdirs(&target).await?;
            } else if entry.file_type().is_file() {
                let content = tokio::fs::read(entry.path()).await?;
                self.import_file(&target, &content).await?;
                uploaded += 1;
            }
        }

        debug!(files = uploaded, remote = remote_root, "Synced directory");
        Ok(uploaded)
    }

    async fn deploy_app(&self, name: &str, source_path: &str) -> Result<DeploymentInfo> {
        let response = self
            .client
            .post(self.url(&format!("/api/2.0/apps/{}/deployments", name)))
            .json(&json!({ "source_code_path": source_path, "mode": "SNAPSHOT" }))
            .send()
            .await?;
        let deployment: DeploymentResponse = Self::check(response).await?.json().await?;

        let (state, message) = match deployment.status {
            Some(status) => (status.state, status.message),
            None => (None, None),
        };
        if state.as_deref() == Some("FAILED") {
            return Err(Error::Deploy(
                message.unwrap_or_else(|| "deployment failed".to_string()),
            ));
        }

        Ok(DeploymentInfo {
            deployment_id: deployment.deployment_id,
            state,
            message,
        })
    }
}
