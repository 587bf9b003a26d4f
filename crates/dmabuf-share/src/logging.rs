//! Subscriber setup for the binary and tests.

use tracing_subscriber::EnvFilter;

/// Log to stderr, filtered by `RUST_LOG` or `default_filter` when unset.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
