use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{MakeWriter, fmt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

/// Returns the default `RUST_LOG` filter for the given level.
///
/// Debug and trace output is limited to our own crates, the HTTP stack stays at `INFO`.
pub fn default_env_filter(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => {
            "INFO,\
             hyper=WARN,\
             reqwest=WARN"
        }
        LevelFilter::DEBUG => {
            "INFO,\
             hyper=WARN,\
             suspense_cache=DEBUG,\
             userpage=DEBUG"
        }
        LevelFilter::TRACE => {
            "INFO,\
             hyper=WARN,\
             suspense_cache=TRACE,\
             userpage=TRACE"
        }
    }
}

/// Installs a global subscriber writing one JSON object per line to `make_writer`.
///
/// Events carry their span context. Errors are also forwarded to sentry.
pub fn init_json_logging<W>(env_filter: &str, make_writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(make_writer)
        .finish()
        .with(sentry::integrations::tracing::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_env_filter() {
        assert_eq!(default_env_filter(LevelFilter::OFF), "");
        assert!(default_env_filter(LevelFilter::DEBUG).contains("suspense_cache=DEBUG"));
        assert!(!default_env_filter(LevelFilter::INFO).contains("suspense_cache"));

        for level in [LevelFilter::ERROR, LevelFilter::INFO, LevelFilter::TRACE] {
            let filter = default_env_filter(level);
            assert!(tracing_subscriber::EnvFilter::try_new(filter).is_ok());
        }
    }
}
