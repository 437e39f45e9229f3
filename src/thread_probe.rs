//! Introspection of the thread that runs a watched call
//!
//! The watchdog is polled from a background thread, so everything it learns
//! about the owner goes through [`ThreadProbe`]: name, lifecycle state and
//! current stack. None of these calls fail; an owner that is gone reports
//! `TERMINATED` and a stack that cannot be read renders as an empty trace.
//!
//! On Linux [`OwnerThread`] reads the owner's scheduler state from procfs and
//! walks its live stack through a signal (see [`crate::os_thread`]).
//! Elsewhere, or when the owner does not answer, it falls back to the stack
//! captured at call entry, which the owner may replace with
//! [`OwnerThread::refresh`].

#[cfg(target_os = "linux")]
use crate::os_thread::{self, Tid};
use crate::stack_trace::{frames_from_backtrace, CallFrame};
use backtrace::Backtrace;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, Thread};

/// Lifecycle state of a thread as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
    /// Introspection failed
    Unknown,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadState::New => "NEW",
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimedWaiting => "TIMED_WAITING",
            ThreadState::Terminated => "TERMINATED",
            ThreadState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Read-only view of the thread executing a watched call
pub trait ThreadProbe: Send + Sync {
    fn name(&self) -> String;
    fn state(&self) -> ThreadState;
    /// Current stack, innermost frame first
    fn current_frames(&self) -> Vec<CallFrame>;
}

thread_local! {
    // Dropped by the TLS destructor when the thread exits.
    static LIVENESS: Arc<()> = Arc::new(());
}

/// Probe bound to the thread that created it
pub struct OwnerThread {
    thread: Thread,
    #[cfg(target_os = "linux")]
    tid: Tid,
    alive: Weak<()>,
    snapshot: Mutex<Backtrace>,
}

impl OwnerThread {
    /// Bind to the calling thread and snapshot its stack (unresolved)
    pub fn current() -> Self {
        let alive = LIVENESS
            .try_with(Arc::downgrade)
            .unwrap_or_else(|_| Weak::new());

        Self {
            thread: thread::current(),
            #[cfg(target_os = "linux")]
            tid: os_thread::current_tid(),
            alive,
            snapshot: Mutex::new(Backtrace::new_unresolved()),
        }
    }

    /// Replace the stack snapshot with the owner's current stack
    ///
    /// Only the owning thread can take its own stack; calls from any other
    /// thread are ignored and return `false`.
    pub fn refresh(&self) -> bool {
        if thread::current().id() != self.thread.id() {
            return false;
        }
        match self.snapshot.lock() {
            Ok(mut snapshot) => {
                *snapshot = Backtrace::new_unresolved();
                true
            }
            Err(_) => false,
        }
    }

    /// Whether `self` is bound to the calling thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread.id()
    }

    fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }

    #[cfg(target_os = "linux")]
    fn live_state(&self) -> ThreadState {
        os_thread::scheduler_state(self.tid).unwrap_or_else(|err| {
            tracing::debug!(tid = self.tid, error = %err, "scheduler state unavailable");
            ThreadState::Unknown
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn live_state(&self) -> ThreadState {
        ThreadState::Runnable
    }

    #[cfg(target_os = "linux")]
    fn live_frames(&self) -> Option<Vec<CallFrame>> {
        os_thread::capture_stack(self.tid).filter(|frames| !frames.is_empty())
    }

    #[cfg(not(target_os = "linux"))]
    fn live_frames(&self) -> Option<Vec<CallFrame>> {
        None
    }

    fn snapshot_frames(&self) -> Vec<CallFrame> {
        match self.snapshot.lock() {
            Ok(mut snapshot) => {
                snapshot.resolve();
                frames_from_backtrace(&snapshot)
            }
            Err(poisoned) => {
                tracing::debug!(error = %poisoned, "stack snapshot unavailable");
                Vec::new()
            }
        }
    }
}

impl ThreadProbe for OwnerThread {
    fn name(&self) -> String {
        match self.thread.name() {
            Some(name) => name.to_string(),
            None => format!("thread-{:?}", self.thread.id()),
        }
    }

    fn state(&self) -> ThreadState {
        if self.is_alive() {
            self.live_state()
        } else {
            ThreadState::Terminated
        }
    }

    /// Live stack of the owner, or the entry snapshot when it cannot be read
    fn current_frames(&self) -> Vec<CallFrame> {
        if self.is_current() {
            return frames_from_backtrace(&Backtrace::new());
        }
        if self.is_alive() {
            if let Some(frames) = self.live_frames() {
                return frames;
            }
        }
        self.snapshot_frames()
    }
}

impl fmt::Debug for OwnerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerThread")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Scripted probe for tests and simulations
#[derive(Debug)]
pub struct FixedProbe {
    name: String,
    state: Mutex<ThreadState>,
    frames: Vec<CallFrame>,
}

impl FixedProbe {
    pub fn new(name: impl Into<String>, frames: Vec<CallFrame>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ThreadState::Runnable),
            frames,
        }
    }

    pub fn set_state(&self, state: ThreadState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }
}

impl ThreadProbe for FixedProbe {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> ThreadState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(ThreadState::Unknown)
    }

    fn current_frames(&self) -> Vec<CallFrame> {
        self.frames.clone()
    }
}
