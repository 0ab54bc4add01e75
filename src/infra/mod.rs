// src/infra/mod.rs

pub mod config;
pub mod errors;

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence over the supplied default directive so
/// operators can turn individual modules up or down without a redeploy.
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}
