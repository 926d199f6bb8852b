//! Results and progress events for a pipeline run.
//!
//! Stage tasks report what they did through [`StageResult`]; the pipeline
//! folds those into a [`RunSummary`]. Progress is streamed as [`StageEvent`]s
//! when the caller provides a channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    /// Every stage succeeded
    Completed,
    /// At least one stage failed
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What a successful stage action did to its release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Fresh install
    Installed,
    /// A half-finished install was deleted and installed again
    Reinstalled,
    Upgraded,
    Deleted,
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOutcome::Installed => write!(f, "installed"),
            StageOutcome::Reinstalled => write!(f, "reinstalled"),
            StageOutcome::Upgraded => write!(f, "upgraded"),
            StageOutcome::Deleted => write!(f, "deleted"),
        }
    }
}

/// Result of one stage action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage key
    pub key: String,
    /// Release name
    pub release: String,
    /// What happened, if the action succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StageOutcome>,
    /// Error message if the action failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl StageResult {
    pub fn success(key: &str, release: &str, outcome: StageOutcome, duration: Duration) -> Self {
        Self {
            key: key.to_string(),
            release: release.to_string(),
            outcome: Some(outcome),
            error: None,
            duration,
        }
    }

    pub fn failure(key: &str, release: &str, error: &str, duration: Duration) -> Self {
        Self {
            key: key.to_string(),
            release: release.to_string(),
            outcome: None,
            error: Some(error.to_string()),
            duration,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_stages: usize,
    pub completed: usize,
    pub failed: usize,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Results keyed by stage
    #[serde(default)]
    pub stage_results: BTreeMap<String, StageResult>,
}

impl RunSummary {
    pub fn new(total_stages: usize) -> Self {
        Self {
            total_stages,
            ..Default::default()
        }
    }

    pub fn add_result(&mut self, result: StageResult) {
        if result.succeeded() {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.stage_results.insert(result.key.clone(), result);
    }

    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.completed == self.total_stages
    }

    pub fn state(&self) -> RunState {
        if self.all_success() {
            RunState::Completed
        } else {
            RunState::Failed
        }
    }
}

/// Progress events emitted while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    /// A stage task started and is resolving its values.
    Started { stage: String, release: String },
    /// A stage is blocked on other stages.
    Waiting { stage: String, on: Vec<String> },
    Installing { stage: String, release: String },
    Upgrading { stage: String, release: String },
    Deleting { stage: String, release: String },
    /// A stage finished, successfully or not.
    Completed { stage: String, result: StageResult },
    /// The whole run finished.
    RunCompleted { success: bool, summary: RunSummary },
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serde helpers for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_terminal() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::new(3);
        summary.add_result(StageResult::success(
            "db",
            "db",
            StageOutcome::Installed,
            Duration::from_secs(3),
        ));
        summary.add_result(StageResult::failure(
            "api",
            "api",
            "hook failed",
            Duration::from_secs(1),
        ));
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_success());
        assert_eq!(summary.state(), RunState::Failed);

        let mut ok = RunSummary::new(1);
        ok.add_result(StageResult::success(
            "db",
            "db",
            StageOutcome::Upgraded,
            Duration::ZERO,
        ));
        assert_eq!(ok.state(), RunState::Completed);
    }

    #[test]
    fn test_event_serialization() {
        let event = StageEvent::Waiting {
            stage: "api".into(),
            on: vec!["db".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"waiting""#));
        assert!(json.contains("db"));

        let result = StageResult::success(
            "db",
            "db",
            StageOutcome::Reinstalled,
            Duration::from_millis(1500),
        );
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""outcome":"reinstalled""#));
        assert!(json.contains(r#""duration":1500"#));
        assert!(!json.contains("error"));
    }
}
