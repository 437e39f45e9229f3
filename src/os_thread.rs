//! Kernel-level view of another thread in this process (Linux)
//!
//! Threads are addressed by kernel tid. The scheduler state is read from
//! `/proc/self/task/<tid>/stat`. The live stack is taken by signalling the
//! thread: its handler walks the stack into a preallocated buffer of raw
//! addresses, and the requesting thread resolves symbols afterwards.
//!
//! ```text
//!  requester                         target thread
//!  ─────────                         ─────────────
//!  lock CAPTURE_LOCK
//!  slot.target = tid   ──tgkill──▶   handler: CAS target tid → CLAIMED
//!                                    walk stack into slot.ips (no alloc)
//!  wait for DONE       ◀──────────   slot.target = DONE
//!  copy + resolve ips
//!  slot.target = IDLE
//! ```

use crate::stack_trace::{frames_from_ips, CallFrame};
use crate::thread_probe::ThreadState;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Kernel thread id
pub type Tid = libc::pid_t;

/// Raw addresses kept per capture, signal delivery frames included
const CAPTURE_CAPACITY: usize = 128;

/// How long the target has to enter its handler
const REPLY_TIMEOUT: Duration = Duration::from_millis(100);

/// How long a handler that has started may take to finish its walk
const WALK_TIMEOUT: Duration = Duration::from_secs(1);

const IDLE: i32 = 0;
const CLAIMED: i32 = -1;
const DONE: i32 = -2;

/// Tid of the calling thread
pub fn current_tid() -> Tid {
    // SAFETY: gettid has no preconditions and cannot fail
    unsafe { libc::syscall(libc::SYS_gettid) as Tid }
}

/// Scheduler state of thread `tid`
///
/// # Errors
/// Returns error if the stat file is unreadable (thread gone, no procfs) or
/// does not carry a state field.
pub fn scheduler_state(tid: Tid) -> io::Result<ThreadState> {
    let stat = fs::read_to_string(format!("/proc/self/task/{}/stat", tid))?;
    parse_state(&stat)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "stat line has no state"))
}

/// Map the state letter that follows `(comm)` in a stat line
fn parse_state(stat: &str) -> Option<ThreadState> {
    // comm may itself contain ") ", so anchor on the last one
    let rest = &stat[stat.rfind(')')? + 1..];
    let code = rest.trim_start().chars().next()?;

    let state = match code {
        'R' => ThreadState::Runnable,
        'S' | 'I' | 'T' | 't' | 'P' => ThreadState::Waiting,
        'D' => ThreadState::Blocked,
        'Z' | 'X' | 'x' => ThreadState::Terminated,
        _ => ThreadState::Unknown,
    };
    Some(state)
}

struct CaptureSlot {
    /// Tid expected to answer, or one of IDLE / CLAIMED / DONE
    target: AtomicI32,
    len: AtomicUsize,
    ips: [AtomicUsize; CAPTURE_CAPACITY],
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_IP: AtomicUsize = AtomicUsize::new(0);

static SLOT: CaptureSlot = CaptureSlot {
    target: AtomicI32::new(IDLE),
    len: AtomicUsize::new(0),
    ips: [EMPTY_IP; CAPTURE_CAPACITY],
};

/// One capture at a time, so at most one handler walks a stack
static CAPTURE_LOCK: Mutex<()> = Mutex::new(());

/// Set when a handler never finished its walk; live capture stays off
static WEDGED: AtomicBool = AtomicBool::new(false);

static HANDLER_INSTALLED: OnceLock<bool> = OnceLock::new();

fn capture_signal() -> libc::c_int {
    libc::SIGRTMIN() + 1
}

extern "C" fn on_capture_signal(_: libc::c_int) {
    // SAFETY: errno is thread-local and restored before returning
    let errno = unsafe { libc::__errno_location() };
    let saved = unsafe { *errno };

    let claimed = SLOT
        .target
        .compare_exchange(current_tid(), CLAIMED, Ordering::AcqRel, Ordering::Acquire)
        .is_ok();
    if claimed {
        let mut count = 0;
        // SAFETY: CAPTURE_LOCK admits one request at a time, so no other
        // handler walks concurrently; the callback neither allocates nor locks.
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                SLOT.ips[count].store(frame.ip() as usize, Ordering::Relaxed);
                count += 1;
                count < CAPTURE_CAPACITY
            });
        }
        SLOT.len.store(count, Ordering::Relaxed);
        SLOT.target.store(DONE, Ordering::Release);
    }

    unsafe { *errno = saved };
}

/// Install the capture handler once; `false` if the signal is taken
fn install_handler() -> bool {
    *HANDLER_INSTALLED.get_or_init(|| {
        let signal = capture_signal();
        // SAFETY: sigaction structs are plain data, and the current
        // disposition is inspected before anything is replaced.
        unsafe {
            let mut previous: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signal, std::ptr::null(), &mut previous) != 0 {
                return false;
            }
            if previous.sa_sigaction != libc::SIG_DFL {
                tracing::debug!(signal, "capture signal already handled, live stacks disabled");
                return false;
            }

            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_capture_signal as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signal, &action, std::ptr::null_mut()) == 0
        }
    })
}

/// Walk the live stack of thread `tid`, innermost frame first
///
/// Returns `None` when `tid` is the calling thread, the signal could not be
/// delivered, the thread did not answer in time, or live capture is off.
pub fn capture_stack(tid: Tid) -> Option<Vec<CallFrame>> {
    if tid == current_tid() || WEDGED.load(Ordering::Acquire) || !install_handler() {
        return None;
    }

    let _lock = CAPTURE_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    SLOT.len.store(0, Ordering::Relaxed);
    SLOT.target.store(tid, Ordering::Release);

    // SAFETY: tgkill only queues a signal; a stale tid fails with ESRCH
    let sent = unsafe {
        libc::syscall(libc::SYS_tgkill, libc::getpid(), tid, capture_signal())
    } == 0;
    if !sent {
        SLOT.target.store(IDLE, Ordering::Release);
        tracing::debug!(tid, error = %io::Error::last_os_error(), "capture signal not delivered");
        return None;
    }
    if !await_reply(tid) {
        return None;
    }

    let len = SLOT.len.load(Ordering::Relaxed).min(CAPTURE_CAPACITY);
    let ips: Vec<usize> = SLOT.ips[..len]
        .iter()
        .map(|ip| ip.load(Ordering::Relaxed))
        .collect();
    SLOT.target.store(IDLE, Ordering::Release);

    Some(frames_from_ips(&ips))
}

/// Wait until the handler of `tid` has published its walk
fn await_reply(tid: Tid) -> bool {
    let started = Instant::now();
    loop {
        let target = SLOT.target.load(Ordering::Acquire);
        if target == DONE {
            return true;
        }
        let waited = started.elapsed();

        if target == CLAIMED && waited > WALK_TIMEOUT {
            WEDGED.store(true, Ordering::Release);
            tracing::warn!(tid, "stack walk never finished, live capture disabled");
            return false;
        }
        // Withdraw the request unless the handler claimed it meanwhile
        if target == tid
            && waited > REPLY_TIMEOUT
            && SLOT
                .target
                .compare_exchange(tid, IDLE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            tracing::debug!(tid, "thread did not answer capture signal");
            return false;
        }

        thread::sleep(Duration::from_micros(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_parse_state_letters() {
        assert_eq!(parse_state("12 (worker) R 1 2"), Some(ThreadState::Runnable));
        assert_eq!(parse_state("12 (worker) S 1 2"), Some(ThreadState::Waiting));
        assert_eq!(parse_state("12 (worker) D 1 2"), Some(ThreadState::Blocked));
        assert_eq!(parse_state("12 (worker) Z 1 2"), Some(ThreadState::Terminated));
        assert_eq!(parse_state("12 (worker) W 1 2"), Some(ThreadState::Unknown));
    }

    #[test]
    fn test_parse_state_comm_with_parens() {
        assert_eq!(
            parse_state("12 (evil) S (name) D 1 2"),
            Some(ThreadState::Blocked)
        );
    }

    #[test]
    fn test_parse_state_malformed() {
        assert_eq!(parse_state(""), None);
        assert_eq!(parse_state("12 (worker)"), None);
    }

    #[test]
    fn test_own_state_is_runnable() {
        assert_eq!(scheduler_state(current_tid()).unwrap(), ThreadState::Runnable);
    }

    #[test]
    fn test_state_of_missing_thread_is_error() {
        assert!(scheduler_state(Tid::MAX).is_err());
    }

    #[test]
    fn test_capture_of_own_thread_declined() {
        assert!(capture_stack(current_tid()).is_none());
    }

    #[test]
    fn test_capture_of_missing_thread_declined() {
        assert!(capture_stack(Tid::MAX).is_none());
    }

    #[test]
    fn test_capture_of_parked_thread() {
        let (tid_tx, tid_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            tid_tx.send(current_tid()).unwrap();
            release_rx.recv().unwrap();
        });

        let tid = tid_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        let frames = capture_stack(tid);
        release_tx.send(()).unwrap();
        handle.join().unwrap();

        let frames = frames.unwrap();
        assert!(!frames.is_empty());
        assert!(!frames[0].scope.starts_with("backtrace"));
        assert_ne!(frames[0].scope, "overrun::os_thread");
    }
}
