//! In-memory `ReleaseBackend` that records every call in order.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::{Chart, ReleaseBackend, ReleaseStatus};
use crate::errors::BackendError;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Status(String),
    Install { release: String, manifest: String },
    Upgrade { release: String, manifest: String },
    Delete(String),
}

impl Call {
    pub fn release(&self) -> &str {
        match self {
            Call::Status(r) | Call::Delete(r) => r,
            Call::Install { release, .. } | Call::Upgrade { release, .. } => release,
        }
    }

    /// True for calls that change the cluster.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::Status(_))
    }
}

#[derive(Default)]
pub struct RecordingBackend {
    statuses: Mutex<HashMap<String, ReleaseStatus>>,
    failing: HashSet<String>,
    slow: HashSet<String>,
    panicking: HashSet<String>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `status` for `release` until it is installed or deleted.
    pub fn with_status(self, release: &str, status: ReleaseStatus) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .insert(release.to_string(), status);
        self
    }

    /// Make every mutation of `release` fail.
    pub fn failing(mut self, release: &str) -> Self {
        self.failing.insert(release.to_string());
        self
    }

    /// Delay mutations of `release` before they are recorded.
    pub fn slow(mut self, release: &str) -> Self {
        self.slow.insert(release.to_string());
        self
    }

    /// Panic inside every mutation of `release`.
    pub fn panicking(mut self, release: &str) -> Self {
        self.panicking.insert(release.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    /// Position of the first mutation touching `release`.
    pub fn position(&self, release: &str) -> Option<usize> {
        self.mutations().iter().position(|c| c.release() == release)
    }

    async fn mutate(&self, call: Call, after: Option<ReleaseStatus>) -> Result<(), BackendError> {
        let release = call.release().to_string();
        if self.slow.contains(&release) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if self.panicking.contains(&release) {
            panic!("injected panic for {}", release);
        }
        self.calls.lock().unwrap().push(call);
        if self.failing.contains(&release) {
            return Err(BackendError::CommandFailed {
                command: format!("fake {}", release),
                exit_code: 1,
                stderr: "injected failure".into(),
            });
        }
        let mut statuses = self.statuses.lock().unwrap();
        match after {
            Some(status) => statuses.insert(release, status),
            None => statuses.remove(&release),
        };
        Ok(())
    }
}

#[async_trait]
impl ReleaseBackend for RecordingBackend {
    async fn status(&self, release: &str, _namespace: &str) -> Result<ReleaseStatus, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Status(release.to_string()));
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(release)
            .cloned()
            .unwrap_or(ReleaseStatus::NotFound))
    }

    async fn install(&self, chart: &Chart, manifest: &[u8]) -> Result<(), BackendError> {
        let call = Call::Install {
            release: chart.release.clone(),
            manifest: String::from_utf8_lossy(manifest).to_string(),
        };
        self.mutate(call, Some(ReleaseStatus::Installed("deployed".into())))
            .await
    }

    async fn upgrade(&self, chart: &Chart, manifest: &[u8]) -> Result<(), BackendError> {
        let call = Call::Upgrade {
            release: chart.release.clone(),
            manifest: String::from_utf8_lossy(manifest).to_string(),
        };
        self.mutate(call, Some(ReleaseStatus::Installed("deployed".into())))
            .await
    }

    async fn delete(&self, release: &str, _namespace: &str) -> Result<(), BackendError> {
        self.mutate(Call::Delete(release.to_string()), None).await
    }
}
