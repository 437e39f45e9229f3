//! Registry of live watchdogs with a background poller
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ CALLER THREADS                                               │
//! │   guard = monitor.watch(call, settings)  → registry.insert   │
//! │   ... watched call runs ...                                  │
//! │   drop(guard)                            → registry.remove   │
//! └──────────────────────────────────────────────────────────────┘
//!                          │
//!                          │ Mutex<HashMap<id, Arc<Watchdog>>>
//!                          ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ POLLER THREAD                                                │
//! │   loop {                                                     │
//! │     wait poll_interval (or stop signal)                      │
//! │     snapshot registry, release lock                          │
//! │     check() each watchdog, most recently started first       │
//! │   }                                                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Watchdogs are keyed by registration id, so two overlapping calls to the
//! same call site are tracked separately. A failing check is logged and
//! counted; it never stops the pass.

use crate::call_site::CallSite;
use crate::config::MonitorConfig;
use crate::sink::Instruments;
use crate::thread_probe::{OwnerThread, ThreadProbe};
use crate::watchdog::{ByRecency, ExecutionWatchdog, WatchSettings};
use anyhow::{Context, Result};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Outcome of one pass over the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub checked: usize,
    pub escalated: usize,
    pub failed: usize,
}

/// Cumulative monitor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub live: usize,
    pub polls: u64,
    pub checks: u64,
    pub escalations: u64,
    pub failures: u64,
}

struct Registry<C, P> {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Arc<ExecutionWatchdog<C, P>>>>,
    polls: AtomicU64,
    checks: AtomicU64,
    escalations: AtomicU64,
    failures: AtomicU64,
}

impl<C, P> Registry<C, P>
where
    C: CallSite,
    P: ThreadProbe,
{
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
            polls: AtomicU64::new(0),
            checks: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<ExecutionWatchdog<C, P>>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, watchdog: Arc<ExecutionWatchdog<C, P>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, watchdog);
        id
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn poll_once(&self) -> PollReport {
        let mut batch: Vec<_> = self.lock().values().cloned().map(ByRecency).collect();
        batch.sort();

        let mut report = PollReport::default();
        for ByRecency(watchdog) in batch {
            report.checked += 1;
            match watchdog.check() {
                Ok(Some(escalation)) => {
                    report.escalated += 1;
                    tracing::trace!(cycle = escalation.cycle, call = %escalation.call, "escalated");
                }
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(error = %e, "watchdog check failed");
                }
            }
        }

        self.polls.fetch_add(1, Ordering::Relaxed);
        self.checks.fetch_add(report.checked as u64, Ordering::Relaxed);
        self.escalations
            .fetch_add(report.escalated as u64, Ordering::Relaxed);
        self.failures.fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }
}

/// Handle for one registered call; dropping it ends the watch
pub struct WatchGuard<C, P = OwnerThread>
where
    C: CallSite,
    P: ThreadProbe,
{
    id: u64,
    watchdog: Arc<ExecutionWatchdog<C, P>>,
    registry: Arc<Registry<C, P>>,
}

impl<C: CallSite, P: ThreadProbe> WatchGuard<C, P> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn watchdog(&self) -> &ExecutionWatchdog<C, P> {
        &self.watchdog
    }
}

impl<C: CallSite, P: ThreadProbe> Drop for WatchGuard<C, P> {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// Tracks live watchdogs and polls them
///
/// # Example
///
/// ```no_run
/// use overrun::call_site::MethodCall;
/// use overrun::config::MonitorConfig;
/// use overrun::monitor::Monitor;
/// use overrun::sink::Instruments;
///
/// let monitor: Monitor<MethodCall> =
///     Monitor::start(MonitorConfig::default(), Instruments::default())?;
/// let rows = monitor.run_configured(MethodCall::new("app::Repo", "load_all"), || {
///     // long-running work
///     42
/// });
/// assert_eq!(rows, 42);
/// monitor.shutdown();
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Monitor<C, P = OwnerThread>
where
    C: CallSite + 'static,
    P: ThreadProbe + 'static,
{
    registry: Arc<Registry<C, P>>,
    config: MonitorConfig,
    instruments: Instruments,
    stop: Option<Sender<()>>,
    poller: Option<JoinHandle<()>>,
}

impl<C, P> Monitor<C, P>
where
    C: CallSite + 'static,
    P: ThreadProbe + 'static,
{
    /// Create a monitor and spawn its poller thread
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the thread cannot be
    /// spawned.
    pub fn start(config: MonitorConfig, instruments: Instruments) -> Result<Self> {
        config.validate()?;

        let mut monitor = Self::unscheduled(config, instruments);
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let registry = Arc::clone(&monitor.registry);
        let interval = monitor.config.poll_interval();

        let poller = thread::Builder::new()
            .name("overrun-poller".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        registry.poll_once();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .context("Failed to spawn poller thread")?;

        tracing::debug!(interval_ms = monitor.config.poll_interval_ms, "poller started");
        monitor.stop = Some(stop_tx);
        monitor.poller = Some(poller);
        Ok(monitor)
    }

    /// Create a monitor without a poller; call [`Monitor::poll_once`] yourself
    pub fn unscheduled(config: MonitorConfig, instruments: Instruments) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            config,
            instruments,
            stop: None,
            poller: None,
        }
    }

    /// Watch a call owned by `owner`
    pub fn watch_with(&self, call_site: C, settings: WatchSettings, owner: P) -> WatchGuard<C, P> {
        let watchdog = Arc::new(ExecutionWatchdog::observe(
            call_site,
            settings,
            owner,
            self.instruments.clone(),
        ));
        let id = self.registry.insert(Arc::clone(&watchdog));
        WatchGuard {
            id,
            watchdog,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Check every live watchdog once
    pub fn poll_once(&self) -> PollReport {
        self.registry.poll_once()
    }

    /// Number of calls currently watched
    pub fn live(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            live: self.live(),
            polls: self.registry.polls.load(Ordering::Relaxed),
            checks: self.registry.checks.load(Ordering::Relaxed),
            escalations: self.registry.escalations.load(Ordering::Relaxed),
            failures: self.registry.failures.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn instruments(&self) -> &Instruments {
        &self.instruments
    }

    /// Stop the poller thread and wait for it
    pub fn shutdown(mut self) {
        self.stop_poller();
    }

    fn stop_poller(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.poller.take() {
            if handle.join().is_err() {
                tracing::error!("poller thread panicked");
            }
        }
    }
}

impl<C> Monitor<C, OwnerThread>
where
    C: CallSite + 'static,
{
    /// Watch a call running on the current thread
    pub fn watch(&self, call_site: C, settings: WatchSettings) -> WatchGuard<C> {
        self.watch_with(call_site, settings, OwnerThread::current())
    }

    /// Watch a call on the current thread with settings from the config
    pub fn watch_configured(&self, call_site: C) -> WatchGuard<C> {
        let settings = self.settings_for(&call_site);
        self.watch(call_site, settings)
    }

    /// Run `f` on the current thread while it is watched
    pub fn run<F, R>(&self, call_site: C, settings: WatchSettings, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = self.watch(call_site, settings);
        f()
    }

    /// Like [`Monitor::run`] with settings from the config
    pub fn run_configured<F, R>(&self, call_site: C, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = self.watch_configured(call_site);
        f()
    }

    fn settings_for(&self, call_site: &C) -> WatchSettings {
        match call_site.declaring_type() {
            Ok(declaring_type) => self.config.settings_for(declaring_type),
            Err(_) => self.config.defaults,
        }
    }
}

impl<C, P> Drop for Monitor<C, P>
where
    C: CallSite + 'static,
    P: ThreadProbe + 'static,
{
    fn drop(&mut self) {
        self.stop_poller();
    }
}
