//! `tracing` subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::options::CoreOptions;
use crate::types::{GraphError, Result};

/// Installs a global `tracing` subscriber filtered by `level`
/// (any `EnvFilter` directive, e.g. `"info"` or `"cellgraph=debug"`).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| GraphError::Config(format!("Invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| GraphError::Config("Logging already initialized".into()))
}

/// Installs the subscriber using [`CoreOptions::log_filter`].
pub fn init_from_options(opts: &CoreOptions) -> Result<()> {
    init_logging(&opts.log_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_filter_is_a_config_error() {
        assert!(matches!(
            init_logging("cellgraph=notalevel"),
            Err(GraphError::Config(_))
        ));
    }
}
