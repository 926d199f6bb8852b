//! Tracing subscriber setup and span helpers.
//!
//! Logs always go to stderr so that `render` and the JSON progress stream
//! keep stdout to themselves.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable, multi-line
    #[default]
    Pretty,
}

/// Filter used when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `verbose`. Only the first call has any
/// effect.
pub fn init_logging(format: LogFormat, verbose: bool) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                    .init();
            }
        }
    });
}

/// Span wrapping every log line of one stage action.
#[must_use]
pub fn stage_span(key: &str, release: &str, namespace: &str) -> Span {
    tracing::info_span!("stage", key = key, release = release, namespace = namespace)
}
