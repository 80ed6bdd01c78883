#![forbid(unsafe_code)]

use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout belongs to the MCP transport.
pub(crate) fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
