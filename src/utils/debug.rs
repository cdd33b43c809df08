//! Debug logging utilities

use tracing_subscriber::{fmt, EnvFilter};

/// Debug logger for guard operations
pub struct DebugLogger;

impl DebugLogger {
    /// Initialize the logger; `RUST_LOG` wins over the `debug` flag when set
    pub fn init(debug: bool) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if debug {
                EnvFilter::new("callguard=debug")
            } else {
                EnvFilter::new("callguard=warn")
            }
        });

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(debug)
            .init();
    }
}
