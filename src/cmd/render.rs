//! Manifest preview: `convoy render`.

use anyhow::Result;
use std::io::Write;
use std::path::Path;

use super::run::{load_config, load_pipeline, template_engine};
use crate::Cli;

/// Render one stage's templates against its effective values and print them.
///
/// Template functions still query the cluster and docker, but nothing is
/// installed, upgraded or deleted.
pub async fn cmd_render(
    cli: &Cli,
    path: &Path,
    key: &str,
    extra_values: Option<&Path>,
) -> Result<()> {
    let config = load_config(cli, false)?;
    let engine = template_engine(&config);
    let pipeline = load_pipeline(path, extra_values, &engine).await?;

    let stage = pipeline.stage(key)?;
    let values = stage.resolve_values(key, &pipeline.values)?;
    stage.check_requires(key, &values)?;
    let manifest = stage.render(key, &values, &engine).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&manifest)?;
    stdout.flush()?;
    Ok(())
}
