//! Structured logging initialization.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber from `RUST_LOG`, defaulting
/// to `info` when unset.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt::layer().compact());

    // Only the first call in a process wins; a second call (e.g. in tests
    // that also exercise `main`) is a no-op rather than a panic.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_does_not_panic_on_repeated_calls() {
        init_logging();
        init_logging();
    }
}
