use anyhow::Result;
use clap::{Parser, Subcommand};
use convoy::logging::{LogFormat, init_logging};
use convoy::ui::UiMode;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(version, about = "Install and tear down dependent releases concurrently")]
pub struct Cli {
    /// Print job output and debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to convoy.toml (default: ./convoy.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Progress output: rich terminal UI or JSON lines
    #[arg(long, value_enum, default_value = "full", global = true)]
    pub ui: UiMode,

    /// Seconds a stage waits on another before giving up (0 waits forever)
    #[arg(long, global = true)]
    pub wait_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install or upgrade every stage of a pipeline
    Up {
        /// Pipeline file
        pipeline: PathBuf,

        /// Only run these stages (comma-separated); the rest count as installed
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Extra values file, rendered as a template before merging
        #[arg(long)]
        values: Option<PathBuf>,

        /// Cancel remaining stages after the first failure
        #[arg(long)]
        fail_fast: bool,
    },
    /// Delete every release of a pipeline, dependents first
    Down {
        pipeline: PathBuf,

        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        #[arg(long)]
        values: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        #[arg(long)]
        fail_fast: bool,
    },
    /// Validate a pipeline and print its install and teardown order
    Plan { pipeline: PathBuf },
    /// Print the manifest a stage would send, without touching the cluster
    Render {
        pipeline: PathBuf,

        /// Stage key
        stage: String,

        #[arg(long)]
        values: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate convoy.toml
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.verbose);

    match &cli.command {
        Commands::Up {
            pipeline,
            only,
            values,
            fail_fast,
        } => {
            cmd::cmd_up(&cli, pipeline, only, values.as_deref(), *fail_fast).await?;
        }
        Commands::Down {
            pipeline,
            only,
            values,
            yes,
            fail_fast,
        } => {
            cmd::cmd_down(&cli, pipeline, only, values.as_deref(), *yes, *fail_fast).await?;
        }
        Commands::Plan { pipeline } => cmd::cmd_plan(&cli, pipeline)?,
        Commands::Render {
            pipeline,
            stage,
            values,
        } => {
            cmd::cmd_render(&cli, pipeline, stage, values.as_deref()).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli, command.clone())?,
    }

    Ok(())
}
