//! Logging setup
//!
//! The crate logs through `tracing`. Applications that do not install their
//! own subscriber can call [`init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;

/// Install a stderr fmt subscriber honoring `RUST_LOG`
///
/// `verbose` forces DEBUG so escalation stack dumps are visible. Returns
/// `false` if a global subscriber was already installed.
pub fn init_tracing(verbose: bool) -> bool {
    let mut filter = EnvFilter::from_default_env();
    if verbose {
        filter = filter.add_directive(tracing::Level::DEBUG.into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
