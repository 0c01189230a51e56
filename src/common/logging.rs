//! Logging and tracing configuration
//!
//! Diagnostics go to stderr so the REPL keeps exclusive ownership of
//! stdout. DAP traffic is logged at debug level.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize tracing for the REPL
///
/// Log levels are controlled by the `RUST_LOG` environment variable.
/// Default level is WARN for this crate so the prompt stays quiet.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dap_repl=warn,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}
