//! Per-call watchdog with escalating, deduplicated warnings
//!
//! An [`ExecutionWatchdog`] is created when a monitored call starts and is
//! polled by some background scheduler through [`ExecutionWatchdog::check`].
//! Each poll computes how many whole limits have passed beyond the first one:
//!
//! ```text
//! cycle = floor((age - limit) / limit)
//!
//! limit = 100ms    age:  50   120   199   200   250   300   410
//!                cycle:  -1     0     0     1     1     2     3
//! ```
//!
//! A warning plus a debug stack dump is emitted the first time a cycle above
//! the last logged one is seen. The last logged cycle starts at 0 and is only
//! ever raised through compare-and-set, so two pollers racing on the same
//! watchdog still produce a single pair per cycle.
//!
//! # Example
//!
//! ```
//! use overrun::call_site::MethodCall;
//! use overrun::clock::ManualClock;
//! use overrun::sink::{Instruments, MemorySink};
//! use overrun::thread_probe::FixedProbe;
//! use overrun::time_unit::TimeUnit;
//! use overrun::watchdog::{ExecutionWatchdog, WatchSettings};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let sink = Arc::new(MemorySink::new());
//! let watchdog = ExecutionWatchdog::observe(
//!     MethodCall::new("app::Repo", "load"),
//!     WatchSettings::new(TimeUnit::Milliseconds, 100),
//!     FixedProbe::new("worker", Vec::new()),
//!     Instruments::new(Arc::new(clock.clone()), sink.clone()),
//! );
//!
//! clock.advance(Duration::from_millis(200));
//! assert!(watchdog.check()?.is_some());
//! assert!(watchdog.check()?.is_none());
//! assert_eq!(sink.warnings().len(), 1);
//! # Ok::<(), overrun::error::WatchdogError>(())
//! ```

use crate::call_site::CallSite;
use crate::error::{Result, WatchdogError};
use crate::sink::Instruments;
use crate::stack_trace::render_trace;
use crate::thread_probe::{OwnerThread, ThreadProbe, ThreadState};
use crate::time_unit::{format_millis, TimeUnit};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::time::Duration;

/// Threshold settings for one watched call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Unit of `limit`
    pub unit: TimeUnit,
    /// Threshold; must be > 0
    pub limit: i64,
    /// Omit argument values from the rendered call
    pub skip_args: bool,
}

impl WatchSettings {
    pub fn new(unit: TimeUnit, limit: i64) -> Self {
        Self {
            unit,
            limit,
            skip_args: false,
        }
    }

    pub fn skip_args(mut self, skip: bool) -> Self {
        self.skip_args = skip;
        self
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            unit: TimeUnit::Minutes,
            limit: 1,
            skip_args: false,
        }
    }
}

/// What a successful escalation reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    pub cycle: i64,
    /// Call-site text as logged
    pub call: String,
    pub limit_ms: i64,
    pub age_ms: i64,
    pub thread: String,
    pub state: ThreadState,
}

/// Timing and identity state of one monitored call
pub struct ExecutionWatchdog<C, P = OwnerThread> {
    call_site: C,
    settings: WatchSettings,
    started: Duration,
    logged: AtomicI64,
    owner: P,
    instruments: Instruments,
}

impl<C: CallSite> ExecutionWatchdog<C, OwnerThread> {
    /// Watch a call running on the current thread, logging through `tracing`
    pub fn new(call_site: C, unit: TimeUnit, limit: i64, skip_args: bool) -> Self {
        Self::observe(
            call_site,
            WatchSettings {
                unit,
                limit,
                skip_args,
            },
            OwnerThread::current(),
            Instruments::default(),
        )
    }
}

impl<C: CallSite, P: ThreadProbe> ExecutionWatchdog<C, P> {
    /// Watch a call with an explicit owner probe, clock and sink
    pub fn observe(
        call_site: C,
        settings: WatchSettings,
        owner: P,
        instruments: Instruments,
    ) -> Self {
        let started = instruments.clock.now();
        Self {
            call_site,
            settings,
            started,
            logged: AtomicI64::new(0),
            owner,
            instruments,
        }
    }

    /// Poll the call once, escalating if a new cycle has been reached
    ///
    /// Returns the escalation when this poll emitted one, `None` otherwise.
    ///
    /// # Errors
    ///
    /// `InvalidLimit` for a non-positive limit and `Render` when the call site
    /// cannot be rendered. Neither mutates state; the next poll retries.
    pub fn check(&self) -> Result<Option<Escalation>> {
        let WatchSettings {
            unit,
            limit,
            skip_args,
        } = self.settings;
        if limit <= 0 {
            return Err(WatchdogError::InvalidLimit { limit });
        }

        let age = unit.from_duration(self.elapsed());
        let cycle = age.saturating_sub(limit).div_euclid(limit);
        if cycle <= self.logged.load(AtomicOrdering::Acquire) {
            return Ok(None);
        }

        let scope = self.call_site.declaring_type()?;
        let call = self.call_site.render(true, skip_args)?;

        if !self.claim(cycle) {
            return Ok(None);
        }

        let thread = self.owner.name();
        let state = self.owner.state();
        let limit_ms = TimeUnit::Milliseconds.convert(limit, unit);
        let age_ms = TimeUnit::Milliseconds.convert(age, unit);

        self.instruments.sink.warn(
            scope,
            &format!(
                "{}: takes more than {}, {} already, thread={}/{}",
                call,
                format_millis(limit_ms),
                format_millis(age_ms),
                thread,
                state
            ),
        );
        self.instruments.sink.debug(
            scope,
            &format!(
                "{}: thread {}/{} stacktrace: {}",
                call,
                thread,
                state,
                render_trace(&self.owner.current_frames())
            ),
        );

        Ok(Some(Escalation {
            cycle,
            call,
            limit_ms,
            age_ms,
            thread,
            state,
        }))
    }

    /// Raise the logged cycle to `cycle` if it is higher; `true` if this call did
    fn claim(&self, cycle: i64) -> bool {
        self.logged
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |last| {
                (cycle > last).then_some(cycle)
            })
            .is_ok()
    }
}

impl<C, P> ExecutionWatchdog<C, P> {
    /// Highest cycle logged so far (0 before any escalation)
    pub fn last_logged_cycle(&self) -> i64 {
        self.logged.load(AtomicOrdering::Acquire)
    }

    pub fn call_site(&self) -> &C {
        &self.call_site
    }

    pub fn settings(&self) -> WatchSettings {
        self.settings
    }

    pub fn owner(&self) -> &P {
        &self.owner
    }

    /// Clock reading taken at construction
    pub fn started(&self) -> Duration {
        self.started
    }

    /// Time since construction on the watchdog's clock
    pub fn elapsed(&self) -> Duration {
        self.instruments.clock.now().saturating_sub(self.started)
    }

    /// Compare by start time only: the earlier start is the *greater* one
    ///
    /// Sorting ascending therefore puts the most recently started call first.
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        other.started.cmp(&self.started)
    }
}

impl<C: PartialEq, P> PartialEq for ExecutionWatchdog<C, P> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.call_site == other.call_site
    }
}

impl<C: Eq, P> Eq for ExecutionWatchdog<C, P> {}

impl<C: Hash, P> Hash for ExecutionWatchdog<C, P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.call_site.hash(state);
    }
}

impl<C: fmt::Debug, P> fmt::Debug for ExecutionWatchdog<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionWatchdog")
            .field("call_site", &self.call_site)
            .field("settings", &self.settings)
            .field("started", &self.started)
            .field("last_logged_cycle", &self.last_logged_cycle())
            .finish_non_exhaustive()
    }
}

/// Wrapper ordering watchdogs by [`ExecutionWatchdog::recency_cmp`]
///
/// Equality here is start-time equality, independent of the call site, so the
/// wrapper can live in sorted containers and heaps.
#[derive(Debug, Clone)]
pub struct ByRecency<W>(pub W);

impl<W, C, P> PartialEq for ByRecency<W>
where
    W: std::ops::Deref<Target = ExecutionWatchdog<C, P>>,
{
    fn eq(&self, other: &Self) -> bool {
        self.0.started == other.0.started
    }
}

impl<W, C, P> Eq for ByRecency<W> where W: std::ops::Deref<Target = ExecutionWatchdog<C, P>> {}

impl<W, C, P> PartialOrd for ByRecency<W>
where
    W: std::ops::Deref<Target = ExecutionWatchdog<C, P>>,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W, C, P> Ord for ByRecency<W>
where
    W: std::ops::Deref<Target = ExecutionWatchdog<C, P>>,
{
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.recency_cmp(&other.0)
    }
}
