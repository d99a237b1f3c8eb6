// Tracing setup
//
// Diagnostics go to stderr so stdout carries only model output.

use tracing_subscriber::EnvFilter;

/// Default filter when RUST_LOG is unset
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "marten=debug"
    } else {
        "marten=info"
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `debug`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
