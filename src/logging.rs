/// Structured logging setup using tracing
///
/// Console output goes to stderr ONLY (never stdout): the MCP server speaks
/// JSON-RPC on stdout. Auto-detects format: human-readable with ANSI colors
/// when stderr is a terminal, structured JSON when piped/redirected.

use std::io::IsTerminal;
use std::sync::Mutex;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};
use crate::config::Config;

/// Initialize tracing subscriber with stderr output and optional JSON file output
///
/// Log level from config.log_level (default: info)
/// RUST_LOG env var can override at runtime
pub fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stderr_layer = if std::io::stderr().is_terminal() {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .boxed()
    };

    // An unopenable log file degrades to stderr-only; reported once the subscriber is up.
    let mut file_error = None;
    let file_layer = config.log_file.as_ref().and_then(|path| {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .json()
                    .boxed(),
            ),
            Err(e) => {
                file_error = Some(format!("{}: {}", path, e));
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(err) = file_error {
        tracing::warn!(error = %err, "Could not open log_file, logging to stderr only");
    }
}
