//! Structured logging setup for keyledger binaries
//!
//! `watch` runs unattended, so it logs one JSON object per event with the
//! source location. One-shot commands print their result on stdout and keep
//! their logs short and human readable on stderr.

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize JSON logging for the long-running `watch` daemon
///
/// Events go to stdout with their target, file and line; spans are left out
/// since the scheduler loop opens none. `RUST_LOG` wins over `default_level`
/// when it is set.
pub fn init_logging(service_name: &str, default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    tracing::info!(
        service = service_name,
        version = env!("CARGO_PKG_VERSION"),
        "JSON logging initialized"
    );
}

/// Initialize console logging for one-shot commands
///
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_console_logging(service_name: &str, default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!(
        service = service_name,
        "Console logging initialized"
    );
}
