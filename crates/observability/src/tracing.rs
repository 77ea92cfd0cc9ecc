//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Subscriber options, usually taken from the `log` settings section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Filter directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: true,
        }
    }
}

impl LogOptions {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize tracing/logging for the process.
///
/// `RUST_LOG` wins over `options.filter`; an unparsable filter falls back to `info`.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(options: &LogOptions) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(options.env_filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = if options.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
