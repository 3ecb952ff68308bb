//! Structured logging setup: `--debug` raises the default level, `RUST_LOG`
//! overrides both, and filtering everything out doubles as the null logger.

use tracing_subscriber::{EnvFilter, fmt};

pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}
