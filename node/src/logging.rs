//! Log setup for `pod-node`.
//!
//! Events go to stderr; stdout is reserved for the JSON trade records the
//! subcommands print. A non-empty `RUST_LOG` replaces the built-in
//! directive entirely.

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored output with source locations.
    Pretty,
    /// One JSON object per event, with the enclosing trade span inlined.
    Json,
}

/// Subscriber settings, installed once per process.
#[derive(Debug, Clone)]
pub struct Logging<'a> {
    directive: &'a str,
    format: LogFormat,
}

impl<'a> Logging<'a> {
    /// `directive` applies when `RUST_LOG` is unset or blank, e.g.
    /// `"pod_node=info,pod_protocol=debug"`.
    pub fn new(directive: &'a str, format: LogFormat) -> Self {
        Self { directive, format }
    }

    /// Install the global subscriber. Fails on a bad directive or when a
    /// subscriber is already set.
    pub fn install(self) -> Result<()> {
        let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let filter = filter_for(from_env.as_deref(), self.directive)?;
        tracing_subscriber::registry()
            .with(self.layer().with_filter(filter))
            .try_init()
            .context("failed to install log subscriber")?;
        tracing::debug!(format = ?self.format, "logging initialized");
        Ok(())
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer().with_writer(std::io::stderr).with_target(true);
        match self.format {
            LogFormat::Pretty => base.with_file(true).with_line_number(true).boxed(),
            LogFormat::Json => base
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .boxed(),
        }
    }
}

/// Pick the environment directive over the default unless it is blank.
fn filter_for(from_env: Option<&str>, default: &str) -> Result<EnvFilter> {
    let directive = match from_env {
        Some(env) if !env.trim().is_empty() => env,
        _ => default,
    };
    EnvFilter::try_new(directive).with_context(|| format!("invalid log directive {directive:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_env_falls_back_to_default() {
        let filter = filter_for(Some("  "), "pod_node=debug").unwrap();
        assert_eq!(filter.to_string(), "pod_node=debug");
        let filter = filter_for(None, "warn").unwrap();
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn env_directive_wins() {
        let filter = filter_for(Some("pod_protocol::net=trace"), "info").unwrap();
        assert_eq!(filter.to_string(), "pod_protocol::net=trace");
    }

    #[test]
    fn bad_directive_is_an_error() {
        let err = filter_for(Some("pod_node=loud"), "info").unwrap_err();
        assert!(err.to_string().contains("pod_node=loud"));
    }
}
