use std::env;

use sentry::integrations::tracing::EventFilter;
use suspense_cache::config::{Config, LogFormat};
use suspense_cache::logging::{default_env_filter, init_json_logging};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

/// How log lines are laid out on `stderr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Style {
    Pretty,
    Compact,
    Json,
}

/// `Auto` picks pretty output for a terminal, and plain lines for everything else.
fn style(format: LogFormat, attended: bool) -> Style {
    match format {
        LogFormat::Auto if attended => Style::Pretty,
        LogFormat::Auto | LogFormat::Simplified => Style::Compact,
        LogFormat::Pretty => Style::Pretty,
        LogFormat::Json => Style::Json,
    }
}

/// Errors are reported to sentry as events, warnings and infos are attached as breadcrumbs.
fn sentry_filter(level: &Level) -> EventFilter {
    match *level {
        Level::ERROR => EventFilter::Event,
        Level::WARN | Level::INFO => EventFilter::Breadcrumb,
        Level::DEBUG | Level::TRACE => EventFilter::Ignore,
    }
}

/// Installs the global subscriber, writing to `stderr` so logs never mix with users on `stdout`.
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Safety
/// With `enable_backtraces`, this sets `RUST_BACKTRACE` through [`std::env::set_var`], which is
/// only sound while no other threads are running.
pub unsafe fn init_logging(config: &Config) {
    if config.logging.enable_backtraces {
        // SAFETY: Upheld by the caller.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let filter = env::var("RUST_LOG")
        .unwrap_or_else(|_| default_env_filter(config.logging.level).to_owned());

    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);
    let layer = match style(config.logging.format, console::user_attended_stderr()) {
        Style::Pretty => layer.pretty().boxed(),
        Style::Compact => layer.compact().with_ansi(false).boxed(),
        Style::Json => return init_json_logging(&filter, std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(EnvFilter::new(&filter)))
        .with(sentry::integrations::tracing::layer().event_filter(|md| sentry_filter(md.level())))
        .init();
}

/// Reports a fatal error through the logger, or straight to `stderr` if nothing would log it.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::enabled!(Level::ERROR) {
        tracing::error!("{error:?}");
    } else {
        eprintln!("{error:?}");
    }
}
