//! Overrun - watchdog for long-running calls
//!
//! Wrap an in-flight call in an [`ExecutionWatchdog`](watchdog::ExecutionWatchdog),
//! poll it from a background thread, and get one warning (plus a debug stack
//! dump) the first time each further multiple of the configured limit is
//! crossed. The watchdog only observes: it never cancels the call.
//!
//! - [`stack_trace`]: compact one-line rendering of call frames
//! - [`watchdog`]: per-call timing state and escalation logic
//! - [`monitor`]: registry of live watchdogs and a background poller
//! - [`config`]: TOML settings with per-type overrides

pub mod call_site;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
#[cfg(target_os = "linux")]
pub mod os_thread;
pub mod sink;
pub mod stack_trace;
pub mod thread_probe;
pub mod time_unit;
pub mod watchdog;
