//! Shell jobs run before and after a stage's release action.
//!
//! Each job is run through `sh -c` in the pipeline directory. The stage's
//! effective values are exported as environment variables on top of the
//! ambient environment, so a job can read `$namespace` or `$release`.
//!
//! ```yaml
//! jobs:
//!   before:
//!     - ./scripts/migrate.sh
//!   after:
//!     - kubectl rollout status deploy/$release -n $namespace
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::errors::HookError;
use crate::values::Values;

/// Captured result of a successful job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub command: String,
    pub stdout: String,
}

/// Runs stage jobs sequentially.
#[derive(Debug, Clone)]
pub struct JobRunner {
    /// Working directory for every job
    working_dir: PathBuf,
    /// Print job stdout as it completes
    verbose: bool,
    /// Upper bound for a single job
    timeout: Duration,
}

impl JobRunner {
    pub fn new(working_dir: impl AsRef<Path>, verbose: bool, timeout: Duration) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            verbose,
            timeout,
        }
    }

    /// Run a single job with `values` in its environment.
    pub async fn run(&self, command: &str, values: &Values) -> Result<JobOutput, HookError> {
        if command.trim().is_empty() {
            return Err(HookError::EmptyCommand);
        }

        tracing::info!(job = command, "running job");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .envs(values)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HookError::SpawnFailed {
                command: command.to_string(),
                source,
            })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| HookError::SpawnFailed {
                command: command.to_string(),
                source,
            })?,
            // The child is dropped with the future and killed.
            Err(_) => {
                return Err(HookError::TimedOut {
                    command: command.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if self.verbose && !stdout.trim().is_empty() {
            println!("{}", stdout.trim_end());
        }

        if !output.status.success() {
            return Err(HookError::NonZeroExit {
                command: command.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(JobOutput {
            command: command.to_string(),
            stdout,
        })
    }

    /// Run jobs in order, stopping at the first failure.
    pub async fn run_all(
        &self,
        jobs: &[String],
        values: &Values,
    ) -> Result<Vec<JobOutput>, HookError> {
        let mut outputs = Vec::with_capacity(jobs.len());
        for job in jobs {
            outputs.push(self.run(job, values).await?);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn runner(dir: &Path) -> JobRunner {
        JobRunner::new(dir, false, Duration::from_secs(5))
    }

    fn vals(pairs: &[(&str, &str)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_job_sees_values_as_env() {
        let dir = tempdir().unwrap();
        let values = vals(&[("namespace", "prod"), ("release", "api")]);
        let out = runner(dir.path())
            .run("echo $release@$namespace", &values)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "api@prod");
    }

    #[tokio::test]
    async fn test_job_keeps_ambient_env() {
        let dir = tempdir().unwrap();
        let out = runner(dir.path())
            .run("test -n \"$PATH\" && echo ok", &Values::new())
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "ok");
    }

    #[tokio::test]
    async fn test_job_runs_in_working_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let out = runner(dir.path())
            .run("cat marker.txt", &Values::new())
            .await
            .unwrap();
        assert_eq!(out.stdout, "here");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = tempdir().unwrap();
        let err = runner(dir.path())
            .run("echo broken >&2; exit 4", &Values::new())
            .await
            .unwrap_err();
        match err {
            HookError::NonZeroExit {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 4);
                assert_eq!(stderr, "broken");
            }
            other => panic!("Expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_command() {
        let dir = tempdir().unwrap();
        let err = runner(dir.path()).run("   ", &Values::new()).await.unwrap_err();
        assert!(matches!(err, HookError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempdir().unwrap();
        let runner = JobRunner::new(dir.path(), false, Duration::from_millis(200));
        let err = runner.run("sleep 5", &Values::new()).await.unwrap_err();
        assert!(matches!(err, HookError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_run_all_stops_on_failure() {
        let dir = tempdir().unwrap();
        let jobs = vec![
            "touch first".to_string(),
            "exit 1".to_string(),
            "touch third".to_string(),
        ];
        let err = runner(dir.path()).run_all(&jobs, &Values::new()).await;
        assert!(err.is_err());
        assert!(dir.path().join("first").exists());
        assert!(!dir.path().join("third").exists());
    }
}
