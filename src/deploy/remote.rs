//! Remote deployment target abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Principal the remote calls run as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_name: String,
}

/// A deployable app on the remote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Principal that created the app
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Handle of a triggered deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub deployment_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Get/create/sync/deploy verbs the deployer needs from a remote
#[async_trait]
pub trait RemoteTarget: Send + Sync {
    /// Principal behind the configured credentials
    async fn current_user(&self) -> Result<UserInfo>;

    /// Look up an app; `None` when it does not exist
    async fn get_app(&self, name: &str) -> Result<Option<AppInfo>>;

    /// Create an app
    async fn create_app(&self, name: &str, description: &str) -> Result<AppInfo>;

    /// Upload `local` to `remote_path`, skipping directories named in
    /// `excluded_dirs`. Returns the number of files uploaded.
    async fn sync_directory(
        &self,
        local: &Path,
        remote_path: &str,
        excluded_dirs: &[String],
    ) -> Result<usize>;

    /// Deploy the app from the synced source path
    async fn deploy_app(&self, name: &str, source_path: &str) -> Result<DeploymentInfo>;
}
