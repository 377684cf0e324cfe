//! Logging setup for the command-line driver.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging with a default filter.
///
/// `RUST_LOG` overrides the default. `verbose` turns on per-module debug
/// events (module invocations, registrations).
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,param_registry_core=debug")
        } else {
            EnvFilter::new("info")
        }
    });

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).try_init();
}
