//! Lifecycle of a single releasable unit.
//!
//! A stage's `create` waits on the stages it depends on and signals its own
//! key; `destroy` runs the other way round, waiting on its dependents and
//! then signalling the stages it depended on. Running every stage of a
//! pipeline concurrently with one shared [`Depends`] therefore installs in
//! dependency order and tears down in reverse.
//!
//! Both actions take their completion guard before anything that can fail, so
//! a stage that errors or panics still releases the stages waiting on it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{Chart, ReleaseBackend, ReleaseStatus};
use crate::depends::{Depends, teardown_key};
use crate::errors::{BackendError, StageError};
use crate::hooks::JobRunner;
use crate::state::{StageEvent, StageOutcome};
use crate::template::TemplateEngine;
use crate::values::{self, Values};

/// Shell jobs attached to a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jobs {
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
}

/// One releasable unit of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(flatten)]
    pub chart: Chart,
    /// Refuse to create if the release already exists
    #[serde(default)]
    pub abandon: bool,
    /// Stage-specific value overrides
    #[serde(default)]
    pub values: Option<PathBuf>,
    /// Value keys that must be set before the stage may run
    #[serde(default)]
    pub requires: Vec<String>,
    /// Stages that must be created before this one
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub jobs: Jobs,
    /// Templates rendered, in order, into the release manifest
    #[serde(default)]
    pub templates: Vec<PathBuf>,
}

/// Everything a stage action needs besides the stage itself.
///
/// One context is shared by every stage task of a run.
pub struct RunContext {
    pub backend: Arc<dyn ReleaseBackend>,
    pub engine: TemplateEngine,
    pub jobs: JobRunner,
    pub depends: Depends,
    /// Deadline for each dependency wait; `None` waits forever
    pub wait_timeout: Option<Duration>,
    pub verbose: bool,
    events: Option<mpsc::Sender<StageEvent>>,
}

impl RunContext {
    pub fn new(backend: Arc<dyn ReleaseBackend>, engine: TemplateEngine, jobs: JobRunner) -> Self {
        Self {
            backend,
            engine,
            jobs,
            depends: Depends::new(),
            wait_timeout: None,
            verbose: false,
            events: None,
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Stream progress events to `tx`.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<StageEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Emit an event to the event channel if configured.
    pub async fn emit(&self, event: StageEvent) {
        if let Some(ref tx) = self.events {
            tx.send(event).await.ok();
        }
    }
}

impl Stage {
    pub fn release(&self) -> &str {
        &self.chart.release
    }

    pub fn namespace(&self) -> &str {
        &self.chart.namespace
    }

    /// Resolve relative file references against `base_dir`.
    pub fn rebase(&mut self, base_dir: &Path) {
        if let Some(values) = self.values.take() {
            self.values = Some(base_dir.join(values));
        }
        for template in &mut self.templates {
            *template = base_dir.join(&*template);
        }
    }

    /// Build this stage's effective values from the pipeline's base values.
    pub fn resolve_values(&self, key: &str, base: &Values) -> Result<Values, StageError> {
        values::resolve(base, self.values.as_deref(), self.namespace(), self.release()).map_err(
            |e| StageError::ValueFile {
                stage: key.to_string(),
                path: self.values.clone().unwrap_or_default(),
                message: format!("{:#}", e),
            },
        )
    }

    /// Fail if any required value is absent.
    pub fn check_requires(&self, key: &str, values: &Values) -> Result<(), StageError> {
        match self.requires.iter().find(|r| !values.contains_key(*r)) {
            Some(missing) => Err(StageError::MissingRequirement {
                stage: key.to_string(),
                name: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Render the stage's templates against its effective values.
    pub async fn render(
        &self,
        key: &str,
        values: &Values,
        engine: &TemplateEngine,
    ) -> Result<Vec<u8>, StageError> {
        engine
            .render_all(&self.templates, values)
            .await
            .map_err(|source| StageError::Render {
                stage: key.to_string(),
                source,
            })
    }

    fn backend_err(&self, operation: &'static str) -> impl FnOnce(BackendError) -> StageError + '_ {
        move |source| StageError::Backend {
            release: self.release().to_string(),
            operation,
            source,
        }
    }

    /// Install or upgrade the release once every dependency is created.
    ///
    /// Signals `key` on every exit path.
    pub async fn create(
        &self,
        key: &str,
        base: &Values,
        ctx: &RunContext,
    ) -> Result<StageOutcome, StageError> {
        let _done = ctx.depends.guard([key]);
        let release = self.release();
        let namespace = self.namespace();

        ctx.emit(StageEvent::Started {
            stage: key.to_string(),
            release: release.to_string(),
        })
        .await;

        match ctx.backend.status(release, namespace).await {
            Ok(status) if status.exists() && self.abandon => {
                return Err(StageError::AlreadyInstalled {
                    stage: key.to_string(),
                    release: release.to_string(),
                });
            }
            Ok(_) => {}
            Err(e) if self.abandon => return Err(self.backend_err("status")(e)),
            Err(e) => debug!(error = %e, "preflight status query failed"),
        }

        info!("resolving values");
        let values = self.resolve_values(key, base)?;
        self.check_requires(key, &values)?;

        if !self.depends.is_empty() {
            info!(depends = ?self.depends, "waiting");
            ctx.emit(StageEvent::Waiting {
                stage: key.to_string(),
                on: self.depends.clone(),
            })
            .await;
        }
        ctx.depends
            .wait_timeout(self.depends.iter().map(String::as_str), ctx.wait_timeout)
            .await
            .map_err(|waiting_on| StageError::WaitTimeout {
                stage: key.to_string(),
                waiting_on,
                timeout: ctx.wait_timeout.unwrap_or_default(),
            })?;

        ctx.jobs
            .run_all(&self.jobs.before, &values)
            .await
            .map_err(|source| StageError::HookFailed {
                stage: key.to_string(),
                source,
            })?;

        let result = self.apply(key, &values, ctx).await;

        // After jobs run whenever the before jobs did, and never change the result.
        if let Err(e) = ctx.jobs.run_all(&self.jobs.after, &values).await {
            warn!(error = %e, "after job failed");
        }

        result
    }

    /// Render and hand the manifest to the backend.
    async fn apply(
        &self,
        key: &str,
        values: &Values,
        ctx: &RunContext,
    ) -> Result<StageOutcome, StageError> {
        let release = self.release();
        let namespace = self.namespace();

        let manifest = self.render(key, values, &ctx.engine).await?;
        if ctx.verbose {
            debug!(manifest = %String::from_utf8_lossy(&manifest), "rendered manifest");
        }

        let status = ctx
            .backend
            .status(release, namespace)
            .await
            .map_err(self.backend_err("status"))?;

        let outcome = match status {
            ReleaseStatus::Installed(_) => {
                info!("upgrading release");
                ctx.emit(StageEvent::Upgrading {
                    stage: key.to_string(),
                    release: release.to_string(),
                })
                .await;
                ctx.backend
                    .upgrade(&self.chart, &manifest)
                    .await
                    .map_err(self.backend_err("upgrade"))?;
                StageOutcome::Upgraded
            }
            ReleaseStatus::PendingInstall | ReleaseStatus::NotFound => {
                let stale = status == ReleaseStatus::PendingInstall;
                if stale {
                    info!("deleting stale release");
                    ctx.backend
                        .delete(release, namespace)
                        .await
                        .map_err(self.backend_err("delete"))?;
                }
                info!("installing release");
                ctx.emit(StageEvent::Installing {
                    stage: key.to_string(),
                    release: release.to_string(),
                })
                .await;
                ctx.backend
                    .install(&self.chart, &manifest)
                    .await
                    .map_err(self.backend_err("install"))?;
                if stale {
                    StageOutcome::Reinstalled
                } else {
                    StageOutcome::Installed
                }
            }
        };

        info!(%outcome, "done");
        Ok(outcome)
    }

    /// Delete the release once every dependent stage is gone.
    ///
    /// `dependents` are the keys of stages listing this one in `depends`.
    /// Releases the stages this one depends on, on every exit path.
    pub async fn destroy(
        &self,
        key: &str,
        dependents: &[String],
        values: &Values,
        ctx: &RunContext,
    ) -> Result<StageOutcome, StageError> {
        let _done = ctx.depends.guard(self.depends.iter().map(|d| teardown_key(d, key)));
        let release = self.release();

        ctx.emit(StageEvent::Started {
            stage: key.to_string(),
            release: release.to_string(),
        })
        .await;

        self.check_requires(key, values)?;

        if !dependents.is_empty() {
            info!(dependents = ?dependents, "waiting");
            ctx.emit(StageEvent::Waiting {
                stage: key.to_string(),
                on: dependents.to_vec(),
            })
            .await;
        }
        ctx.depends
            .wait_timeout(
                dependents.iter().map(|d| teardown_key(key, d)),
                ctx.wait_timeout,
            )
            .await
            .map_err(|pending| StageError::WaitTimeout {
                stage: key.to_string(),
                waiting_on: dependents
                    .iter()
                    .filter(|d| pending.contains(&teardown_key(key, d)))
                    .cloned()
                    .collect(),
                timeout: ctx.wait_timeout.unwrap_or_default(),
            })?;

        info!("deleting release");
        ctx.emit(StageEvent::Deleting {
            stage: key.to_string(),
            release: release.to_string(),
        })
        .await;
        ctx.backend
            .delete(release, self.namespace())
            .await
            .map_err(self.backend_err("delete"))?;

        info!("done");
        Ok(StageOutcome::Deleted)
    }
}
