//! Pipeline execution commands: `convoy up`, `convoy down`.

use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::Confirm;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use convoy::backend::HelmCli;
use convoy::cluster::Kubectl;
use convoy::config::ConvoyConfig;
use convoy::hooks::JobRunner;
use convoy::pipeline::{Action, Pipeline, RunOptions};
use convoy::registry::DockerRegistry;
use convoy::stage::RunContext;
use convoy::template::{FunctionMap, TemplateEngine};
use convoy::ui::RunUI;
use convoy::values;

use crate::Cli;

/// Resolve configuration from the file, the environment and CLI flags.
pub(super) fn load_config(cli: &Cli, fail_fast: bool) -> Result<ConvoyConfig> {
    let config = ConvoyConfig::load(cli.config.clone())?.with_cli_args(
        cli.verbose,
        fail_fast,
        cli.wait_timeout,
    );
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}

/// Template engine wired to the real cluster and docker registry.
pub(super) fn template_engine(config: &ConvoyConfig) -> TemplateEngine {
    TemplateEngine::new(FunctionMap::builtin(
        Arc::new(Kubectl::new(config.kubectl_cmd())),
        Arc::new(DockerRegistry::new()),
    ))
}

/// Load a pipeline and fold an optional `--values` file into its base values.
pub(super) async fn load_pipeline(
    path: &Path,
    extra_values: Option<&Path>,
    engine: &TemplateEngine,
) -> Result<Pipeline> {
    let mut pipeline = Pipeline::load(path)?;
    if extra_values.is_some() {
        let base = std::mem::take(&mut pipeline.values);
        pipeline.values = values::extrapolate(extra_values, base, engine)
            .await
            .context("Failed to apply --values")?;
    }
    Ok(pipeline)
}

pub async fn cmd_up(
    cli: &Cli,
    pipeline: &Path,
    only: &[String],
    extra_values: Option<&Path>,
    fail_fast: bool,
) -> Result<()> {
    execute(cli, Action::Create, pipeline, only, extra_values, fail_fast).await
}

pub async fn cmd_down(
    cli: &Cli,
    pipeline: &Path,
    only: &[String],
    extra_values: Option<&Path>,
    yes: bool,
    fail_fast: bool,
) -> Result<()> {
    if !yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Delete every release in {}?",
                style(pipeline.display()).yellow()
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Aborted.");
            return Ok(());
        }
    }
    execute(cli, Action::Destroy, pipeline, only, extra_values, fail_fast).await
}

async fn execute(
    cli: &Cli,
    action: Action,
    path: &Path,
    only: &[String],
    extra_values: Option<&Path>,
    fail_fast: bool,
) -> Result<()> {
    let config = load_config(cli, fail_fast)?;
    let engine = template_engine(&config);
    let pipeline = load_pipeline(path, extra_values, &engine).await?;

    let options = RunOptions {
        only: match only.is_empty() {
            true => None,
            false => Some(pipeline.select(only.iter().cloned())?),
        },
        fail_fast: config.fail_fast(),
    };
    let total = options
        .only
        .as_ref()
        .map_or(pipeline.stages.len(), |only| only.len());

    let (tx, mut rx) = mpsc::channel(100);
    let ctx = RunContext::new(
        Arc::new(HelmCli::new(config.helm_cmd())),
        engine,
        JobRunner::new(&pipeline.base_dir, config.verbose(), config.hook_timeout()),
    )
    .with_wait_timeout(config.wait_timeout()?)
    .with_verbose(config.verbose())
    .with_event_channel(tx);

    let title = match action {
        Action::Create => "up",
        Action::Destroy => "down",
    };
    let ui = RunUI::new(total, title, cli.ui, config.verbose());
    let ui_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            ui.handle_event(&event);
        }
    });

    // The context, and with it the last event sender, is dropped when the run returns.
    let outcome = pipeline.run(action, Arc::new(ctx), &options).await;
    ui_task.await.ok();

    if let Some(err) = outcome.error {
        bail!(
            "{} of {} stages failed: {}",
            outcome.summary.failed,
            outcome.summary.total_stages,
            err
        );
    }
    Ok(())
}
