//! `ReleaseBackend` implementation that shells out to the helm CLI.
//!
//! Rendered manifests are passed as a values document on stdin
//! (`--values -`), so nothing is written to disk.

use async_trait::async_trait;
use serde::Deserialize;

use super::{Chart, ReleaseBackend, ReleaseStatus};
use crate::errors::BackendError;
use crate::util::{args, capture, describe};

#[derive(Debug, Deserialize)]
struct StatusOutput {
    info: StatusInfo,
}

#[derive(Debug, Deserialize)]
struct StatusInfo {
    #[serde(default)]
    status: String,
}

/// Drives releases through the `helm` binary.
#[derive(Debug, Clone)]
pub struct HelmCli {
    command: String,
}

impl HelmCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run(&self, argv: &[String], stdin: Option<&[u8]>) -> Result<Vec<u8>, BackendError> {
        let line = describe(&self.command, argv);
        tracing::debug!(command = %line, "helm");

        let output = capture(&self.command, argv, stdin)
            .await
            .map_err(|source| BackendError::SpawnFailed {
                command: line.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: line,
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Arguments shared by install and upgrade.
fn chart_args(verb: &str, chart: &Chart) -> Vec<String> {
    let mut argv = args([
        verb,
        chart.release.as_str(),
        chart.name.as_str(),
        "--namespace",
        chart.namespace.as_str(),
        "--values",
        "-",
    ]);
    if let Some(repo) = &chart.repo {
        argv.extend(args(["--repo", repo.as_str()]));
    }
    if let Some(version) = &chart.version {
        argv.extend(args(["--version", version.as_str()]));
    }
    if chart.timeout > 0 {
        let timeout = format!("{}s", chart.timeout);
        argv.extend(args(["--wait", "--timeout", timeout.as_str()]));
    }
    argv
}

fn is_not_found(err: &BackendError) -> bool {
    matches!(err, BackendError::CommandFailed { stderr, .. } if stderr.contains("not found"))
}

#[async_trait]
impl ReleaseBackend for HelmCli {
    async fn status(&self, release: &str, namespace: &str) -> Result<ReleaseStatus, BackendError> {
        let argv = args(["status", release, "--namespace", namespace, "--output", "json"]);
        let stdout = match self.run(&argv, None).await {
            Ok(stdout) => stdout,
            Err(err) if is_not_found(&err) => return Ok(ReleaseStatus::NotFound),
            Err(err) => return Err(err),
        };

        let parsed: StatusOutput =
            serde_json::from_slice(&stdout).map_err(|e| BackendError::MalformedStatus {
                release: release.to_string(),
                message: e.to_string(),
            })?;
        Ok(ReleaseStatus::parse(&parsed.info.status))
    }

    async fn install(&self, chart: &Chart, manifest: &[u8]) -> Result<(), BackendError> {
        let mut argv = chart_args("install", chart);
        argv.push("--create-namespace".to_string());
        self.run(&argv, Some(manifest)).await.map(drop)
    }

    async fn upgrade(&self, chart: &Chart, manifest: &[u8]) -> Result<(), BackendError> {
        self.run(&chart_args("upgrade", chart), Some(manifest))
            .await
            .map(drop)
    }

    async fn delete(&self, release: &str, namespace: &str) -> Result<(), BackendError> {
        let argv = args(["uninstall", release, "--namespace", namespace]);
        match self.run(&argv, None).await {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => {
                tracing::warn!(release, "release already absent");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn chart() -> Chart {
        Chart {
            name: "stable/postgresql".into(),
            repo: Some("https://charts.example".into()),
            version: Some("1.2.3".into()),
            release: "db".into(),
            timeout: 300,
            namespace: "data".into(),
        }
    }

    /// A fake helm that logs its argv and stdin and answers status queries.
    fn fake_helm(dir: &Path) -> String {
        let script = dir.join("helm");
        let log = dir.join("calls.log");
        std::fs::write(
            &script,
            format!(
                r#"#!/bin/sh
echo "$@" >> {log}
case "$1" in
  status)
    case "$2" in
      db) echo '{{"info":{{"status":"pending-install"}}}}' ;;
      broken) echo 'not json' ;;
      *) echo "Error: release: not found" >&2; exit 1 ;;
    esac ;;
  install|upgrade)
    [ "$2" = "missing" ] && {{ echo "Error: INSTALLATION FAILED: chart not found" >&2; exit 1; }}
    cat >> {log} ;;
  uninstall)
    [ "$2" = "gone" ] && {{ echo "Error: uninstall: Release not loaded: gone: release: not found" >&2; exit 1; }}
    [ "$2" = "locked" ] && {{ echo "Error: cluster unreachable" >&2; exit 1; }} ;;
esac
exit 0
"#,
                log = log.display()
            ),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        script.to_string_lossy().to_string()
    }

    #[test]
    fn test_chart_args() {
        let argv = chart_args("upgrade", &chart());
        assert_eq!(
            argv.join(" "),
            "upgrade db stable/postgresql --namespace data --values - \
             --repo https://charts.example --version 1.2.3 --wait --timeout 300s"
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let dir = tempdir().unwrap();
        let helm = HelmCli::new(fake_helm(dir.path()));

        assert_eq!(
            helm.status("db", "data").await.unwrap(),
            ReleaseStatus::PendingInstall
        );
        assert_eq!(
            helm.status("other", "data").await.unwrap(),
            ReleaseStatus::NotFound
        );
        assert!(matches!(
            helm.status("broken", "data").await,
            Err(BackendError::MalformedStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_install_pipes_manifest() {
        let dir = tempdir().unwrap();
        let helm = HelmCli::new(fake_helm(dir.path()));

        helm.install(&chart(), b"replicas: 2\n").await.unwrap();

        let log = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert!(log.contains("install db stable/postgresql"));
        assert!(log.contains("--create-namespace"));
        assert!(log.contains("replicas: 2"));
    }

    #[tokio::test]
    async fn test_install_failure_before_reading_manifest() {
        let dir = tempdir().unwrap();
        let helm = HelmCli::new(fake_helm(dir.path()));
        let chart = Chart {
            release: "missing".into(),
            ..chart()
        };
        let manifest = vec![b'#'; 1 << 20];

        match helm.install(&chart, &manifest).await.unwrap_err() {
            BackendError::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "Error: INSTALLATION FAILED: chart not found");
            }
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_release() {
        let dir = tempdir().unwrap();
        let helm = HelmCli::new(fake_helm(dir.path()));

        helm.delete("db", "data").await.unwrap();
        helm.delete("gone", "data").await.unwrap();
        let err = helm.delete("locked", "data").await.unwrap_err();
        assert!(err.to_string().contains("cluster unreachable"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let helm = HelmCli::new("convoy-no-such-helm");
        assert!(matches!(
            helm.status("db", "data").await,
            Err(BackendError::SpawnFailed { .. })
        ));
    }
}
