//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use suspense_cache::auth::AuthContext;
use suspense_cache::config::Config;
use suspense_cache::metrics;
use suspense_cache::users::{UserCache, UserClient};
use tracing::level_filters::LevelFilter;

use crate::{logging, output, render};

/// The environment variable an auth token can be passed in.
const AUTH_TOKEN_ENV: &str = "USERPAGE_AUTH_TOKEN";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Outputs all users as a JSON list.
    Json,
    /// Outputs one line per user.
    Pretty,
    /// Outputs all users as a table.
    Compact,
}

/// Fetches users and prints them once all of them finished loading.
///
/// All users are requested concurrently, and each distinct id is fetched only once. Users that
/// fail to load are printed along with their error.
///
/// An auth token can be provided via the `--auth-token` option, the `USERPAGE_AUTH_TOKEN`
/// environment variable, or the configuration file.
#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// The ids of the users to show.
    #[arg(default_values = ["1", "2", "3"])]
    pub ids: Vec<String>,

    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// The bearer token to sign in with.
    #[arg(long = "auth-token")]
    pub auth_token: Option<String>,

    /// The output format.
    #[arg(long, value_enum, default_value = "pretty")]
    format: OutputFormat,

    /// The severity level of logging output, overriding the configuration file.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(token) = cli
        .auth_token
        .clone()
        .or_else(|| std::env::var(AUTH_TOKEN_ENV).ok())
    {
        config.users.auth_token = Some(token);
    }

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime is not started yet, no other threads exist at this point.
    unsafe { logging::init_logging(&config) };

    if let Some(statsd) = &config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        let hostname = config.metrics.hostname_tag.clone().and_then(|tag| {
            hostname::get()
                .ok()
                .and_then(|s| s.into_string().ok())
                .map(|name| (tag, name))
        });
        tags.extend(hostname);
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("userpage-worker")
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    let client = UserClient::new(&config.users, AuthContext::new())?;
    let cache = UserCache::new("users", runtime.handle().clone());

    tracing::info!("Loading {} users from {}", cli.ids.len(), config.users.base_url);
    let fallback = || eprintln!("{}", console::style("Loading...").dim());
    let rendered = runtime.block_on(render::run(&cache, &client, &cli.ids, fallback))?;

    match cli.format {
        OutputFormat::Json => output::print_json(&rendered)?,
        OutputFormat::Pretty => output::print_pretty(&rendered),
        OutputFormat::Compact => output::print_compact(&rendered),
    }

    Ok(())
}
