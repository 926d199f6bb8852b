//! Integration tests for the convoy binary.
//!
//! Runs against a fake `helm` script that records every call, so the full
//! CLI path (config, pipeline loading, fan-out, UI) is exercised without a
//! cluster.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn convoy() -> Command {
    cargo_bin_cmd!("convoy")
}

const PIPELINE: &str = r#"
values:
  region: eu-west-1
charts:
  db:
    name: bitnami/postgresql
    release: db
    namespace: data
  api:
    name: ./charts/api
    release: api
    namespace: web
    depends: [db]
    templates: [api.tpl]
"#;

/// Fake helm: every release is absent, mutations succeed, calls are logged.
const FAKE_HELM: &str = r#"#!/bin/sh
dir=$(dirname "$0")
echo "$1 $2" >> "$dir/calls.log"
case "$1" in
  status)
    echo "Error: release: not found" >&2
    exit 1
    ;;
  install|upgrade)
    cat > "$dir/$2.manifest"
    ;;
esac
"#;

struct Project {
    dir: TempDir,
}

impl Project {
    fn new(pipeline: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pipeline.yaml"), pipeline).unwrap();
        fs::write(
            dir.path().join("api.tpl"),
            "release: {{ .release }}\nregion: {{ .region }}\n",
        )
        .unwrap();

        let helm = dir.path().join("helm");
        fs::write(&helm, FAKE_HELM).unwrap();
        fs::set_permissions(&helm, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn pipeline(&self) -> PathBuf {
        self.path().join("pipeline.yaml")
    }

    fn cmd(&self) -> Command {
        let mut cmd = convoy();
        cmd.current_dir(self.path())
            .env("CONVOY_HELM_CMD", self.path().join("helm"))
            .env("CONVOY_WAIT_TIMEOUT", "30")
            .env_remove("RUST_LOG");
        cmd
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    fn position(&self, call: &str) -> usize {
        self.calls()
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("no call '{}' in {:?}", call, self.calls()))
    }
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_convoy_help() {
        convoy()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("up"))
            .stdout(predicate::str::contains("down"));
    }

    #[test]
    fn test_convoy_version() {
        convoy().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_subcommand() {
        convoy().arg("sideways").assert().failure();
    }
}

mod plan {
    use super::*;

    #[test]
    fn test_plan_prints_waves() {
        let project = Project::new(PIPELINE);
        project
            .cmd()
            .arg("plan")
            .arg(project.pipeline())
            .assert()
            .success()
            .stdout(predicate::str::contains("Install order"))
            .stdout(predicate::str::contains("Teardown order"))
            .stdout(predicate::str::contains("depends=[db]"));
        assert!(project.calls().is_empty());
    }

    #[test]
    fn test_plan_json() {
        let project = Project::new(PIPELINE);
        let output = project
            .cmd()
            .args(["--ui", "json", "plan"])
            .arg(project.pipeline())
            .output()
            .unwrap();
        assert!(output.status.success());

        let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(plan["install_waves"], serde_json::json!([["db"], ["api"]]));
        assert_eq!(plan["teardown_waves"], serde_json::json!([["api"], ["db"]]));
    }

    #[test]
    fn test_plan_rejects_unknown_dependency() {
        let project = Project::new("charts:\n  api:\n    release: api\n    depends: [db]\n");
        project
            .cmd()
            .arg("plan")
            .arg(project.pipeline())
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown stage db"));
    }

    #[test]
    fn test_plan_rejects_cycle() {
        let project = Project::new(
            "charts:\n  a:\n    release: a\n    depends: [b]\n  b:\n    release: b\n    depends: [a]\n",
        );
        project
            .cmd()
            .arg("plan")
            .arg(project.pipeline())
            .assert()
            .failure()
            .stderr(predicate::str::contains("cycle"));
    }
}

mod run {
    use super::*;

    #[test]
    fn test_up_installs_in_dependency_order() {
        let project = Project::new(PIPELINE);
        project
            .cmd()
            .arg("up")
            .arg(project.pipeline())
            .assert()
            .success();

        assert!(project.position("install db") < project.position("install api"));
        let manifest = fs::read_to_string(project.path().join("api.manifest")).unwrap();
        assert_eq!(manifest, "release: api\nregion: eu-west-1\n");
    }

    #[test]
    fn test_up_json_events() {
        let project = Project::new(PIPELINE);
        project
            .cmd()
            .args(["--ui", "json", "up"])
            .arg(project.pipeline())
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""type":"installing""#))
            .stdout(predicate::str::contains(r#""type":"run_completed""#));
    }

    #[test]
    fn test_up_with_values_file() {
        let project = Project::new(PIPELINE);
        fs::write(
            project.path().join("prod.yaml"),
            "region: \"{{ .region }}-prod\"\n",
        )
        .unwrap();

        project
            .cmd()
            .arg("up")
            .arg(project.pipeline())
            .args(["--values", "prod.yaml"])
            .assert()
            .success();

        let manifest = fs::read_to_string(project.path().join("api.manifest")).unwrap();
        assert!(manifest.contains("region: eu-west-1-prod"));
    }

    #[test]
    fn test_up_only_selected_stage() {
        let project = Project::new(PIPELINE);
        project
            .cmd()
            .arg("up")
            .arg(project.pipeline())
            .args(["--only", "api"])
            .assert()
            .success();

        assert!(!project.calls().contains(&"install db".to_string()));
        assert!(project.calls().contains(&"install api".to_string()));
    }

    #[test]
    fn test_up_only_unknown_stage() {
        let project = Project::new(PIPELINE);
        project
            .cmd()
            .arg("up")
            .arg(project.pipeline())
            .args(["--only", "cache"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown stage cache"));
    }

    #[test]
    fn test_up_missing_requirement_fails_run() {
        let project = Project::new(
            "charts:\n  db:\n    release: db\n    requires: [license]\n  api:\n    release: api\n    depends: [db]\n",
        );
        project
            .cmd()
            .arg("up")
            .arg(project.pipeline())
            .assert()
            .failure()
            .stderr(predicate::str::contains("license"));

        // The failing stage still released its dependent.
        assert!(project.calls().contains(&"install api".to_string()));
        assert!(!project.calls().contains(&"install db".to_string()));
    }

    #[test]
    fn test_down_deletes_dependents_first() {
        let project = Project::new(PIPELINE);
        project
            .cmd()
            .arg("down")
            .arg(project.pipeline())
            .arg("--yes")
            .assert()
            .success();

        assert!(project.position("uninstall api") < project.position("uninstall db"));
    }

    #[test]
    fn test_before_job_runs_in_pipeline_dir() {
        let project = Project::new(
            "charts:\n  db:\n    release: db\n    namespace: data\n    jobs:\n      before: [\"echo $namespace > before.txt\"]\n",
        );
        project
            .cmd()
            .arg("up")
            .arg(project.pipeline())
            .assert()
            .success();

        let before = fs::read_to_string(project.path().join("before.txt")).unwrap();
        assert_eq!(before.trim(), "data");
    }
}

mod render {
    use super::*;

    #[test]
    fn test_render_prints_manifest() {
        let project = Project::new(PIPELINE);
        project
            .cmd()
            .arg("render")
            .arg(project.pipeline())
            .arg("api")
            .assert()
            .success()
            .stdout("release: api\nregion: eu-west-1\n");
        assert!(project.calls().is_empty());
    }

    #[test]
    fn test_render_unknown_stage() {
        let project = Project::new(PIPELINE);
        project
            .cmd()
            .arg("render")
            .arg(project.pipeline())
            .arg("cache")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown stage cache"));
    }
}

mod config {
    use super::*;

    #[test]
    fn test_config_show_reflects_env() {
        let project = Project::new(PIPELINE);
        fs::write(
            project.path().join("convoy.toml"),
            "[backend]\nkubectl_cmd = \"oc\"\n",
        )
        .unwrap();

        project
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("kubectl_cmd = \"oc\""))
            .stdout(predicate::str::contains("wait_timeout_secs = 30"));
    }

    #[test]
    fn test_config_validate_rejects_bad_toml() {
        let project = Project::new(PIPELINE);
        fs::write(project.path().join("convoy.toml"), "[run\n").unwrap();
        project
            .cmd()
            .args(["config", "validate"])
            .assert()
            .failure();
    }
}
