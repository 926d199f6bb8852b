//! Container image lookups used by templates.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bollard::Docker;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Image metadata lookups.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Content digest (`sha256:...`) of an image reference.
    async fn image_digest(&self, image: &str) -> Result<String>;

    /// Stored registry credential for `server`, as found in the docker config.
    async fn auth_token(&self, server: &str) -> Result<String>;
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
}

/// `ImageRegistry` backed by the local docker daemon and docker config file.
#[derive(Debug, Clone)]
pub struct DockerRegistry {
    config_path: PathBuf,
}

impl Default for DockerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRegistry {
    /// Use `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`.
    pub fn new() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".docker")))
            .unwrap_or_else(|| PathBuf::from(".docker"));
        Self::with_config(dir.join("config.json"))
    }

    pub fn with_config(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }
}

/// Pick the digest part of the first `repo@sha256:...` entry.
fn digest_from_repo_digests(repo_digests: &[String]) -> Option<String> {
    repo_digests
        .iter()
        .find_map(|d| d.split_once('@').map(|(_, digest)| digest.to_string()))
}

#[async_trait]
impl ImageRegistry for DockerRegistry {
    async fn image_digest(&self, image: &str) -> Result<String> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to docker daemon")?;
        let inspect = docker
            .inspect_image(image)
            .await
            .with_context(|| format!("Failed to inspect image {}", image))?;

        digest_from_repo_digests(&inspect.repo_digests.unwrap_or_default())
            .ok_or_else(|| anyhow!("Image {} has no repository digest", image))
    }

    async fn auth_token(&self, server: &str) -> Result<String> {
        let data = tokio::fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;
        let config: DockerConfig = serde_json::from_str(&data)
            .with_context(|| format!("Invalid docker config {}", self.config_path.display()))?;

        config
            .auths
            .get(server)
            .and_then(|entry| entry.auth.clone())
            .ok_or_else(|| anyhow!("No credentials stored for {}", server))
    }
}
