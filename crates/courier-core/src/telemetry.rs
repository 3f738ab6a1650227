//! Tracing subscriber setup for binaries.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Install the global subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Debug builds log human-readable lines; release builds log JSON.
/// Calling it twice is harmless: the second install is ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cfg!(debug_assertions) {
        registry.with(fmt::layer().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().json()).try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        init_tracing();
        init_tracing();
        tracing::info!("telemetry initialized");
    }
}
