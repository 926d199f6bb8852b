//! Terminal rendering of a pipeline run.
//!
//! Two output modes:
//! - `full`: one spinner per stage plus an overall bar
//! - `json`: every [`StageEvent`] as one JSON line on stdout

use crate::state::{RunSummary, StageEvent, StageResult};
use crate::ui::icons::{CHECK, CLOCK, CROSS, DELETE, INSTALL, SPARKLE, UPGRADE, WAITING, WAVE};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Output mode for the run UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Full,
    Json,
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Progress display fed by [`StageEvent`]s.
///
/// Events arrive from a single receiving task, so the bar map is only ever
/// locked briefly and never re-entrantly.
pub struct RunUI {
    mode: UiMode,
    multi: MultiProgress,
    header_bar: ProgressBar,
    stage_bars: Mutex<HashMap<String, ProgressBar>>,
    verbose: bool,
    term: Term,
}

impl RunUI {
    pub fn new(total_stages: usize, title: &str, mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();
        let header_bar = multi.add(ProgressBar::new(total_stages as u64));
        header_bar.set_style(bar_style(
            "{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        ));
        header_bar.set_prefix(title.to_string());

        if mode == UiMode::Json {
            header_bar.finish_and_clear();
        }

        Self {
            mode,
            multi,
            header_bar,
            stage_bars: Mutex::new(HashMap::new()),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn handle_event(&self, event: &StageEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_json(&self, event: &StageEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_full(&self, event: &StageEvent) {
        match event {
            StageEvent::Started { stage, release } => self.on_started(stage, release),
            StageEvent::Waiting { stage, on } => {
                self.set_message(stage, format!("{}waiting on {}", WAITING, on.join(", ")));
            }
            StageEvent::Installing { stage, release } => {
                self.set_message(stage, format!("{}installing {}", INSTALL, release));
            }
            StageEvent::Upgrading { stage, release } => {
                self.set_message(stage, format!("{}upgrading {}", UPGRADE, release));
            }
            StageEvent::Deleting { stage, release } => {
                self.set_message(stage, format!("{}deleting {}", DELETE, release));
            }
            StageEvent::Completed { stage, result } => self.on_completed(stage, result),
            StageEvent::RunCompleted { success, summary } => {
                self.on_run_completed(*success, summary)
            }
        }
    }

    fn on_started(&self, stage: &str, release: &str) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(bar_style("  {spinner:.green} {prefix:.bold} {msg}"));
        bar.set_prefix(format!("[{}]", stage));
        bar.set_message("resolving values");
        bar.enable_steady_tick(Duration::from_millis(100));

        self.stage_bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stage.to_string(), bar);

        if self.verbose {
            self.multi
                .println(format!(
                    "  {} stage {} (release {})",
                    style("▶").cyan(),
                    style(stage).yellow(),
                    release
                ))
                .ok();
        }
    }

    fn set_message(&self, stage: &str, message: String) {
        let bars = self.stage_bars.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = bars.get(stage) {
            bar.set_message(message);
        }
    }

    fn on_completed(&self, stage: &str, result: &StageResult) {
        let bar = self
            .stage_bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(stage);

        let line = match (&result.outcome, &result.error) {
            (Some(outcome), _) => format!(
                "{}{} {} ({})",
                CHECK,
                style(stage).green().bold(),
                outcome,
                format_duration(result.duration)
            ),
            (None, error) => format!(
                "{}{} {}: {}",
                CROSS,
                style(stage).red().bold(),
                style("failed").red(),
                error.as_deref().unwrap_or("unknown error")
            ),
        };

        // Stages cancelled before they started have no bar.
        match bar {
            Some(bar) => bar.finish_with_message(line),
            None => {
                self.multi.println(format!("  {}", line)).ok();
            }
        }
        self.header_bar.inc(1);
    }

    fn on_run_completed(&self, success: bool, summary: &RunSummary) {
        self.header_bar.finish_and_clear();
        let finished_at = chrono::Local::now().format("%H:%M:%S");

        println!();
        if success {
            println!(
                "{}{} {}/{} stages succeeded at {}",
                SPARKLE,
                style("Done:").green().bold(),
                summary.completed,
                summary.total_stages,
                finished_at
            );
        } else {
            println!(
                "{}{} {} failed, {} succeeded at {}",
                CROSS,
                style("Failed:").red().bold(),
                summary.failed,
                summary.completed,
                finished_at
            );
            for result in summary.stage_results.values().filter(|r| !r.succeeded()) {
                println!(
                    "   {} {}",
                    style(&result.key).red(),
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        println!("{}Total time: {}", CLOCK, format_duration(summary.duration));
    }
}

/// Print install or teardown waves as produced by the plan.
pub fn print_waves(title: &str, waves: &[Vec<String>]) {
    println!("{}", style(title).bold());
    for (i, wave) in waves.iter().enumerate() {
        println!(
            "  {}Wave {}: {}",
            WAVE,
            style(i).yellow().bold(),
            wave.join(", ")
        );
    }
}

/// Human readable duration, coarse above a second.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}
