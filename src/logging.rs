//! Process-wide tracing subscriber.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Install the global subscriber: stdout always, plus a plain-text file
/// layer when `logging.file` is set. `RUST_LOG` overrides `logging.level`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), &config.level)?;

    let stdout = fmt::layer()
        .with_target(false)
        .with_timer(ChronoLocal::rfc_3339());

    let file = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_writer(Mutex::new(handle))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init()
        .context("A global tracing subscriber is already installed")?;
    Ok(())
}

/// `RUST_LOG` when set and non-blank, otherwise the configured level.
fn build_filter(rust_log: Option<&str>, level: &str) -> Result<EnvFilter> {
    let directives = rust_log
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(level);
    EnvFilter::try_new(directives).with_context(|| format!("Invalid log filter: {directives}"))
}
