//! Static pipeline inspection: `convoy plan`.

use anyhow::Result;
use console::style;
use serde_json::json;
use std::path::Path;

use convoy::pipeline::Pipeline;
use convoy::ui::{UiMode, print_waves};

use crate::Cli;

pub fn cmd_plan(cli: &Cli, path: &Path) -> Result<()> {
    let pipeline = Pipeline::load(path)?;
    let graph = pipeline.graph();
    let install = graph.install_waves();
    let teardown = graph.teardown_waves();

    if cli.ui == UiMode::Json {
        let stages: Vec<_> = pipeline
            .stages
            .iter()
            .map(|(key, stage)| {
                json!({
                    "key": key,
                    "release": stage.release(),
                    "namespace": stage.namespace(),
                    "depends": graph.dependencies(key),
                    "dependents": graph.dependents(key),
                })
            })
            .collect();
        let plan = json!({
            "stages": stages,
            "install_waves": install,
            "teardown_waves": teardown,
        });
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!();
    println!(
        "{} {} ({} stages)",
        style("Pipeline").bold(),
        path.display(),
        pipeline.stages.len()
    );
    for (key, stage) in &pipeline.stages {
        let depends = graph.dependencies(key);
        println!(
            "  {} release={} namespace={}{}",
            style(key).cyan(),
            stage.release(),
            stage.namespace(),
            match depends.is_empty() {
                true => String::new(),
                false => format!(" depends=[{}]", depends.join(", ")),
            }
        );
    }
    println!();
    print_waves("Install order", &install);
    println!();
    print_waves("Teardown order", &teardown);
    Ok(())
}
