//! Tool configuration read from `convoy.toml`.
//!
//! Settings are layered file → environment → CLI:
//!
//! ```toml
//! [backend]
//! helm_cmd = "helm"
//! kubectl_cmd = "kubectl"
//!
//! [run]
//! wait_timeout_secs = 1800   # 0 waits forever
//! hook_timeout_secs = 600
//! fail_fast = false
//! verbose = false
//! ```
//!
//! `CONVOY_HELM_CMD`, `CONVOY_KUBECTL_CMD` and `CONVOY_WAIT_TIMEOUT` override
//! the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "convoy.toml";

const HELM_ENV: &str = "CONVOY_HELM_CMD";
const KUBECTL_ENV: &str = "CONVOY_KUBECTL_CMD";
const WAIT_TIMEOUT_ENV: &str = "CONVOY_WAIT_TIMEOUT";

/// External commands used to reach the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSection {
    /// Helm binary (default: "helm")
    #[serde(default)]
    pub helm_cmd: Option<String>,
    /// kubectl binary (default: "kubectl")
    #[serde(default)]
    pub kubectl_cmd: Option<String>,
}

/// Run behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Deadline for each dependency wait, 0 disables it
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    /// Upper bound for a single before/after job
    #[serde(default = "default_hook_timeout_secs")]
    pub hook_timeout_secs: u64,
    /// Cancel the run after the first failing stage
    #[serde(default)]
    pub fail_fast: bool,
    /// Print job output and log rendered manifests
    #[serde(default)]
    pub verbose: bool,
}

fn default_wait_timeout_secs() -> u64 {
    1800
}

fn default_hook_timeout_secs() -> u64 {
    600
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout_secs(),
            hook_timeout_secs: default_hook_timeout_secs(),
            fail_fast: false,
            verbose: false,
        }
    }
}

/// Parsed `convoy.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvoyToml {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub run: RunSection,
}

impl ConvoyToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse convoy.toml")
    }

    /// Load `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn helm_cmd_with(&self, env: Option<String>) -> String {
        env.or_else(|| self.backend.helm_cmd.clone())
            .unwrap_or_else(|| "helm".to_string())
    }

    fn kubectl_cmd_with(&self, env: Option<String>) -> String {
        env.or_else(|| self.backend.kubectl_cmd.clone())
            .unwrap_or_else(|| "kubectl".to_string())
    }

    fn wait_timeout_secs_with(&self, env: Option<String>) -> Result<u64> {
        match env {
            Some(value) => value.trim().parse().with_context(|| {
                format!(
                    "{} must be a number of seconds, got '{}'",
                    WAIT_TIMEOUT_ENV, value
                )
            }),
            None => Ok(self.run.wait_timeout_secs),
        }
    }
}

/// Effective configuration after CLI overrides.
#[derive(Debug, Clone, Default)]
pub struct ConvoyConfig {
    pub toml: ConvoyToml,
    /// CLI override: verbose mode
    pub verbose: bool,
    /// CLI override: fail fast
    pub fail_fast: bool,
    /// CLI override for the wait deadline, in seconds
    pub cli_wait_timeout: Option<u64>,
}

impl ConvoyConfig {
    /// Load from `path`, or `convoy.toml` in the working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let toml = match path {
            Some(path) => ConvoyToml::load(&path)?,
            None => ConvoyToml::load_or_default(Path::new(CONFIG_FILE))?,
        };
        Ok(Self {
            toml,
            ..Default::default()
        })
    }

    pub fn with_cli_args(
        mut self,
        verbose: bool,
        fail_fast: bool,
        wait_timeout: Option<u64>,
    ) -> Self {
        self.verbose = verbose;
        self.fail_fast = fail_fast;
        self.cli_wait_timeout = wait_timeout;
        self
    }

    /// Helm command (env → file → default).
    pub fn helm_cmd(&self) -> String {
        self.toml.helm_cmd_with(std::env::var(HELM_ENV).ok())
    }

    /// kubectl command (env → file → default).
    pub fn kubectl_cmd(&self) -> String {
        self.toml.kubectl_cmd_with(std::env::var(KUBECTL_ENV).ok())
    }

    /// Dependency wait deadline (CLI → env → file); `None` waits forever.
    pub fn wait_timeout(&self) -> Result<Option<Duration>> {
        let secs = match self.cli_wait_timeout {
            Some(secs) => secs,
            None => self
                .toml
                .wait_timeout_secs_with(std::env::var(WAIT_TIMEOUT_ENV).ok())?,
        };
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.run.hook_timeout_secs)
    }

    pub fn verbose(&self) -> bool {
        self.verbose || self.toml.run.verbose
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast || self.toml.run.fail_fast
    }

    /// Problems worth a warning but not fatal.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.toml.run.hook_timeout_secs == 0 {
            warnings.push(
                "hook_timeout_secs is 0: every job will time out immediately".to_string(),
            );
        }
        for (name, cmd) in [
            ("helm_cmd", &self.toml.backend.helm_cmd),
            ("kubectl_cmd", &self.toml.backend.kubectl_cmd),
        ] {
            if cmd.as_deref().is_some_and(|c| c.trim().is_empty()) {
                warnings.push(format!("{} is empty and will fall back to the default", name));
            }
        }
        warnings
    }
}
