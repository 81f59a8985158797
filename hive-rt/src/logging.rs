//! Tracing setup. `HIVE_LOG` selects the filter: a bare level name, or a
//! full `tracing-subscriber` directive string for finer control
//! (`hive_rt::worker=debug,info`).

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `tracing` subscriber reading `HIVE_LOG` (default
/// `info`). Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = std::env::var("HIVE_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .try_init();
}
