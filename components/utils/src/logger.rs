use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Configuration for cloudraid logging.
#[derive(Debug)]
pub struct LoggingConfig {
    /// The default filter directive (in the sense of
    /// [tracing_subscriber::filter::EnvFilter]) to use for logs. Will be
    /// overridden by the `CLOUDRAID_LOG` environment variable if set.
    pub default_filter: String,
    /// Whether to emit logs to stdout.
    pub log_to_stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            log_to_stdout: true,
        }
    }
}

impl LoggingConfig {
    pub fn init_tracing_subscriber(self) {
        let env_filter = create_env_filter(&self.default_filter);
        // Don't create the subscriber if we'll never emit any logs.
        if env_filter.max_level_hint() == Some(LevelFilter::OFF) {
            return;
        }

        let console_layer = if self.log_to_stdout {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_filter(create_env_filter(&self.default_filter));
            Some(fmt_layer)
        } else {
            None
        };

        // try_init so tests that race on the global subscriber don't panic.
        let _ = tracing_subscriber::registry().with(console_layer).try_init();
    }
}

/// Create the logging filter from the CLOUDRAID_LOG environment variable or
/// the provided default if that variable is unset. We do this in a function
/// because [EnvFilter] isn't [Clone] and we need a copy of the filter for
/// each [Layer].
fn create_env_filter(filter: &str) -> EnvFilter {
    EnvFilter::try_from_env("CLOUDRAID_LOG").unwrap_or_else(|_| EnvFilter::new(filter))
}
