//! Release backend: turns a rendered manifest into a running release.
//!
//! The orchestrator only needs four operations from the backend. `HelmCli`
//! drives the `helm` binary; tests use an in-memory double.

mod helm;
#[cfg(test)]
pub(crate) mod testing;

pub use helm::HelmCli;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

/// Chart coordinates and release identity for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    /// Chart reference (e.g. `bitnami/postgresql` or a local path)
    #[serde(default)]
    pub name: String,
    /// Chart repository URL
    #[serde(default)]
    pub repo: Option<String>,
    /// Chart version constraint
    #[serde(default)]
    pub version: Option<String>,
    /// Release name
    #[serde(default)]
    pub release: String,
    /// Install/upgrade wait time in seconds; 0 means do not wait
    #[serde(default)]
    pub timeout: u64,
    /// Target namespace
    #[serde(default)]
    pub namespace: String,
}

/// Current state of a named release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStatus {
    /// No release with this name exists
    NotFound,
    /// A previous install never finished
    PendingInstall,
    /// Installed, failed, uninstalled with kept history or any other state
    Installed(String),
}

impl ReleaseStatus {
    /// Map a backend status string onto the states the orchestrator acts on.
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().replace('_', "-").as_str() {
            "pending-install" => Self::PendingInstall,
            "" => Self::NotFound,
            other => Self::Installed(other.to_string()),
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Operations the orchestrator performs against releases.
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    async fn status(&self, release: &str, namespace: &str) -> Result<ReleaseStatus, BackendError>;

    async fn install(&self, chart: &Chart, manifest: &[u8]) -> Result<(), BackendError>;

    async fn upgrade(&self, chart: &Chart, manifest: &[u8]) -> Result<(), BackendError>;

    async fn delete(&self, release: &str, namespace: &str) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_status_parse() {
        assert_eq!(ReleaseStatus::parse("pending-install"), ReleaseStatus::PendingInstall);
        assert_eq!(ReleaseStatus::parse("PENDING_INSTALL"), ReleaseStatus::PendingInstall);
        assert_eq!(ReleaseStatus::parse(""), ReleaseStatus::NotFound);
        // History kept by `--keep-history` still owns the name.
        assert_eq!(
            ReleaseStatus::parse("uninstalled"),
            ReleaseStatus::Installed("uninstalled".into())
        );
        assert_eq!(
            ReleaseStatus::parse("deployed"),
            ReleaseStatus::Installed("deployed".into())
        );
        assert!(ReleaseStatus::parse("failed").exists());
        assert!(!ReleaseStatus::NotFound.exists());
    }

    #[test]
    fn test_chart_yaml_defaults() {
        let chart: Chart = serde_yaml::from_str("name: stable/redis\nrelease: cache\n").unwrap();
        assert_eq!(chart.name, "stable/redis");
        assert_eq!(chart.release, "cache");
        assert_eq!(chart.timeout, 0);
        assert!(chart.repo.is_none());
    }
}
