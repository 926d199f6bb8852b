//! Pipeline files and the fan-out of stage actions.
//!
//! ```yaml
//! derive: ../base.yaml
//! values:
//!   registry: registry.example.com
//! charts:
//!   db:
//!     name: bitnami/postgresql
//!     release: db
//!     namespace: data
//!   api:
//!     name: ./charts/api
//!     release: api
//!     namespace: web
//!     depends: [db]
//!     templates: [api.yaml.tpl]
//! ```
//!
//! A run launches one task per selected stage at once. The tasks share a
//! single [`RunContext`]; ordering comes only from the dependency waits inside
//! [`Stage::create`] and [`Stage::destroy`].

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, error, info, warn};

use crate::depends::teardown_key;
use crate::errors::{PipelineError, StageError};
use crate::logging::stage_span;
use crate::plan::StageGraph;
use crate::stage::{RunContext, Stage};
use crate::state::{ExecutionTimer, RunSummary, StageEvent, StageResult};
use crate::values::{self, Values};

/// Which lifecycle action a run applies to every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Destroy,
}

/// On-disk shape of a pipeline file.
#[derive(Debug, Default, Deserialize)]
struct PipelineFile {
    #[serde(default)]
    derive: Option<PathBuf>,
    #[serde(default, alias = "stages")]
    charts: BTreeMap<String, Stage>,
    #[serde(default)]
    values: BTreeMap<String, serde_yaml::Value>,
}

/// A loaded and validated pipeline.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    /// Directory of the pipeline file; jobs run here
    pub base_dir: PathBuf,
    pub stages: BTreeMap<String, Stage>,
    /// Base values shared read-only by every stage
    pub values: Values,
    graph: StageGraph,
}

/// Options for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run only these stages; the others are treated as already done
    pub only: Option<BTreeSet<String>>,
    /// Cancel the remaining stages after any failure, not just fatal ones
    pub fail_fast: bool,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    /// First error surfaced by the run
    pub error: Option<PipelineError>,
}

impl RunOutcome {
    pub fn into_result(self) -> Result<RunSummary, PipelineError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.summary),
        }
    }
}

impl Pipeline {
    /// Load a pipeline file, following its `derive` chain.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let mut visited = Vec::new();
        let (file, values) = Self::load_chain(path, &mut visited)?;

        let base_dir = parent_dir(path);
        let mut stages = file.charts;
        for stage in stages.values_mut() {
            stage.rebase(&base_dir);
        }

        let mut pipeline = Self::new(stages, values)?;
        pipeline.base_dir = base_dir;
        Ok(pipeline)
    }

    /// Build a pipeline from already-parsed stages.
    pub fn new(stages: BTreeMap<String, Stage>, values: Values) -> Result<Self, PipelineError> {
        let graph = StageGraph::build(&stages)?;
        Ok(Self {
            base_dir: PathBuf::from("."),
            stages,
            values,
            graph,
        })
    }

    /// Parse `path` and merge the values of every file it derives from.
    ///
    /// Values of the derived-from file are applied first, so the deriving
    /// file wins on conflicts.
    fn load_chain(
        path: &Path,
        visited: &mut Vec<PathBuf>,
    ) -> Result<(PipelineFile, Values), PipelineError> {
        let identity = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if visited.contains(&identity) {
            return Err(PipelineError::DeriveCycle {
                path: path.to_path_buf(),
            });
        }
        visited.push(identity);

        let load_err = |message: String| PipelineError::Load {
            path: path.to_path_buf(),
            message,
        };
        let data = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let file: PipelineFile = if data.trim().is_empty() {
            PipelineFile::default()
        } else {
            serde_yaml::from_str(&data).map_err(|e| load_err(e.to_string()))?
        };

        let mut values = match &file.derive {
            Some(derive) => {
                let derive = parent_dir(path).join(derive);
                info!(derive = %derive.display(), "loading derived pipeline");
                Self::load_chain(&derive, visited)?.1
            }
            None => Values::new(),
        };
        let own = values::from_mapping(&path.display().to_string(), file.values.clone())
            .map_err(|e| load_err(format!("{:#}", e)))?;
        values::merge_vals(&mut values, own);

        Ok((file, values))
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn stage(&self, key: &str) -> Result<&Stage, PipelineError> {
        self.stages
            .get(key)
            .ok_or_else(|| PipelineError::UnknownStage(key.to_string()))
    }

    /// Validate a stage selection against the pipeline.
    pub fn select<I, S>(&self, keys: I) -> Result<BTreeSet<String>, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        keys.into_iter()
            .map(Into::into)
            .map(|key| match self.stages.contains_key(&key) {
                true => Ok(key),
                false => Err(PipelineError::UnknownStage(key)),
            })
            .collect()
    }

    /// Apply `action` to every selected stage concurrently.
    ///
    /// A failing stage does not stop the others unless its error is fatal or
    /// `fail_fast` is set; then every unfinished stage is cancelled.
    pub async fn run(
        &self,
        action: Action,
        ctx: Arc<RunContext>,
        options: &RunOptions,
    ) -> RunOutcome {
        let timer = ExecutionTimer::start();
        let selected: Vec<(&String, &Stage)> = self
            .stages
            .iter()
            .filter(|(key, _)| options.only.as_ref().is_none_or(|only| only.contains(*key)))
            .collect();

        self.skip_unselected(action, &ctx, options);

        info!(?action, stages = selected.len(), "starting run");
        let base = Arc::new(self.values.clone());
        let mut summary = RunSummary::new(selected.len());
        let mut tasks = FuturesUnordered::new();
        let mut aborts = Vec::with_capacity(selected.len());

        for (key, stage) in selected {
            let key = key.clone();
            let release = stage.release().to_string();
            let stage = stage.clone();
            let dependents = self.graph.dependents(&key).to_vec();
            let ctx = ctx.clone();
            let base = base.clone();
            let span = stage_span(&key, &release, stage.namespace());

            let task_key = key.clone();
            let handle = tokio::spawn(
                async move {
                    let timer = ExecutionTimer::start();
                    let result = match action {
                        Action::Create => stage.create(&task_key, &base, &ctx).await,
                        Action::Destroy => {
                            stage.destroy(&task_key, &dependents, &base, &ctx).await
                        }
                    };
                    (result, timer.elapsed())
                }
                .instrument(span),
            );
            aborts.push(handle.abort_handle());
            tasks.push(async move { (key, release, handle.await) });
        }

        let mut first_error: Option<PipelineError> = None;
        while let Some((key, release, joined)) = tasks.next().await {
            let (result, error) = match joined {
                Ok((Ok(outcome), elapsed)) => {
                    (StageResult::success(&key, &release, outcome, elapsed), None)
                }
                Ok((Err(err), elapsed)) => {
                    error!(stage = %key, release = %release, error = %err, "stage failed");
                    let cancel = err.is_fatal() || options.fail_fast;
                    let result = StageResult::failure(&key, &release, &err.to_string(), elapsed);
                    if cancel {
                        warn!(stage = %key, "cancelling remaining stages");
                        aborts.iter().for_each(|a| a.abort());
                    }
                    (result, Some((err.is_fatal(), stage_failed(&key, err))))
                }
                Err(join) if join.is_cancelled() => {
                    (StageResult::failure(&key, &release, "cancelled", Default::default()), None)
                }
                Err(_) => {
                    error!(stage = %key, "stage task panicked");
                    let result =
                        StageResult::failure(&key, &release, "panicked", Default::default());
                    (result, Some((false, PipelineError::Join { key: key.clone() })))
                }
            };

            if let Some((fatal, err)) = error {
                // A fatal error replaces an earlier non-fatal one.
                if first_error.is_none() || (fatal && !is_fatal(first_error.as_ref())) {
                    first_error = Some(err);
                }
            }

            ctx.emit(StageEvent::Completed {
                stage: key,
                result: result.clone(),
            })
            .await;
            summary.add_result(result);
        }

        summary.duration = timer.elapsed();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            "run finished"
        );
        ctx.emit(StageEvent::RunCompleted {
            success: first_error.is_none(),
            summary: summary.clone(),
        })
        .await;

        RunOutcome {
            summary,
            error: first_error,
        }
    }

    /// Pre-complete the keys unselected stages would have signalled.
    fn skip_unselected(&self, action: Action, ctx: &RunContext, options: &RunOptions) {
        let Some(only) = &options.only else {
            return;
        };
        for (key, stage) in self.stages.iter().filter(|(k, _)| !only.contains(*k)) {
            match action {
                Action::Create => ctx.depends.complete([key.as_str()]),
                Action::Destroy => ctx
                    .depends
                    .complete(stage.depends.iter().map(|d| teardown_key(d, key))),
            }
        }
    }
}

fn stage_failed(key: &str, source: StageError) -> PipelineError {
    PipelineError::StageFailed {
        key: key.to_string(),
        source,
    }
}

fn is_fatal(err: Option<&PipelineError>) -> bool {
    matches!(err, Some(PipelineError::StageFailed { source, .. }) if source.is_fatal())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
