//! Tracing setup for the Briefcast engine and its trigger binaries.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines for interactive use.
    Text,
    /// Newline-delimited JSON for log shippers.
    Json,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; `default_directive` (e.g. `"briefcast=info"`)
/// applies otherwise. Calling this more than once is harmless: only the
/// first call installs a subscriber.
pub fn init_tracing(format: LogFormat, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false).json())
                .try_init()
                .ok();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false))
                .try_init()
                .ok();
        }
    }
}
