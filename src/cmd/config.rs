//! Configuration view and validation commands: `convoy config`.

use anyhow::Result;
use console::style;

use convoy::config::{CONFIG_FILE, ConvoyConfig};

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| CONFIG_FILE.into());
    let config = ConvoyConfig::load(cli.config.clone())?.with_cli_args(
        cli.verbose,
        false,
        cli.wait_timeout,
    );

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No {} found, using defaults", path.display());
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!("  helm_cmd = \"{}\"", config.helm_cmd());
            println!("  kubectl_cmd = \"{}\"", config.kubectl_cmd());
            match config.wait_timeout()? {
                Some(timeout) => println!("  wait_timeout_secs = {}", timeout.as_secs()),
                None => println!("  wait_timeout_secs = 0 (wait forever)"),
            }
            println!("  hook_timeout_secs = {}", config.hook_timeout().as_secs());
            println!("  fail_fast = {}", config.fail_fast());
            println!("  verbose = {}", config.verbose());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            config.wait_timeout()?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{} Configuration is valid", style("✓").green());
            } else {
                println!("{} Configuration has warnings:", style("!").yellow());
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
