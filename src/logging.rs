use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding a tracing filter directive, e.g. `tidyfs=debug`.
pub const LOG_ENV: &str = "TIDYFS_LOG";

/// Filter directive: `TIDYFS_LOG`, then `RUST_LOG`, then `debug`/`warn` by verbosity.
pub fn filter_directive(verbose: bool) -> String {
    env::var(LOG_ENV)
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_else(|_| if verbose { "debug" } else { "warn" }.to_string())
}

/// Install the global subscriber. Logs go to stderr; stdout is left to the
/// command's own output. Calling it twice is harmless.
pub fn init_logging(verbose: bool) {
    let directive = filter_directive(verbose);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .without_time(),
        )
        .with(filter)
        .try_init();
}
