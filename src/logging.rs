//! Tracing subscriber setup for the binary.
//!
//! The level is controlled through `RUST_LOG` (e.g. `RUST_LOG=debug`);
//! without it, `info` and above are shown.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Call once, before the proxy is built.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
