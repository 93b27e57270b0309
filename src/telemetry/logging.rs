//! Tracing setup for the router process.
//!
//! The dataplane logs through `tracing` (per-packet events at
//! trace/debug, lifecycle at info, drop-warn events at warn). The
//! embedder installs one global subscriber at startup; everything else
//! here stays out of the packet path.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Output shape of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact single-line output for interactive use
    #[default]
    Text,
    /// JSON lines for running under a log collector
    Json,
}

/// Install the global subscriber.
///
/// `level` is a tracing filter directive ("info", "natgate=debug,warn",
/// ...); the RUST_LOG environment variable takes priority when set.
/// A second call is a no-op: the first subscriber stays installed.
pub fn init_logging(level: &str, format: LogFormat) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    match format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json());
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        LogFormat::Text => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact());
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
}
