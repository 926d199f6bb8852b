//! Typed error hierarchy for the convoy orchestrator.
//!
//! Errors are grouped by the boundary that raises them:
//! - `StageError`: one stage's create/destroy action
//! - `PipelineError`: loading, validation and fan-out of a whole run
//! - `BackendError`, `LookupError`, `RenderError`, `HookError`: collaborators

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from the release backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Unexpected status output for release {release}: {message}")]
    MalformedStatus { release: String, message: String },
}

/// Errors from cluster configuration lookups.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{kind} {object} not found in namespace {namespace}")]
    ObjectNotFound {
        kind: &'static str,
        object: String,
        namespace: String,
    },

    #[error("Key {key} not present in {kind} {object}")]
    KeyNotFound {
        kind: &'static str,
        object: String,
        key: String,
    },

    #[error("Failed to decode {kind} {object}: {message}")]
    Decode {
        kind: &'static str,
        object: String,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from template expansion.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to read template {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{template}: unknown function '{function}'")]
    UnknownFunction { template: String, function: String },

    #[error("{template}: no value named '{name}'")]
    MissingValue { template: String, name: String },

    #[error("{template}: malformed expression '{expression}'")]
    Syntax { template: String, expression: String },

    #[error("{template}: {function} failed: {message}")]
    FunctionFailed {
        template: String,
        function: String,
        message: String,
    },
}

/// Errors from shell jobs.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Empty hook command")]
    EmptyCommand,

    #[error("Failed to spawn hook '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Hook '{command}' exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Hook '{command}' timed out after {} seconds", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },
}

/// Errors from a single stage action.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage {stage} requires value '{name}' which is not set")]
    MissingRequirement { stage: String, name: String },

    #[error("Release {release} already installed and stage {stage} is marked abandon")]
    AlreadyInstalled { stage: String, release: String },

    #[error("Failed to load values for stage {stage} from {path}: {message}")]
    ValueFile {
        stage: String,
        path: PathBuf,
        message: String,
    },

    #[error("Stage {stage} timed out after {}s waiting on {waiting_on:?}", .timeout.as_secs())]
    WaitTimeout {
        stage: String,
        waiting_on: Vec<String>,
        timeout: Duration,
    },

    #[error("Hook failed for stage {stage}: {source}")]
    HookFailed {
        stage: String,
        #[source]
        source: HookError,
    },

    #[error("Render failed for stage {stage}: {source}")]
    Render {
        stage: String,
        #[source]
        source: RenderError,
    },

    #[error("Release {release} ({operation}) failed: {source}")]
    Backend {
        release: String,
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

impl StageError {
    /// Whether this error should stop the whole run rather than just the stage.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Backend {
                operation: "install" | "upgrade",
                ..
            }
        )
    }
}

/// Errors from loading, validating or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load pipeline {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("Pipeline derive chain loops back to {path}")]
    DeriveCycle { path: PathBuf },

    #[error("Stage {stage} depends on unknown stage {dependency}")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Dependency cycle detected involving stages: {}", .stages.join(", "))]
    DependencyCycle { stages: Vec<String> },

    #[error("Unknown stage {0}")]
    UnknownStage(String),

    #[error("Stage {key} failed: {source}")]
    StageFailed {
        key: String,
        #[source]
        source: StageError,
    },

    #[error("Stage task {key} panicked")]
    Join { key: String },
}
