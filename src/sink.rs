//! Destinations for escalation records
//!
//! Every escalation produces exactly two records: a warning line and a
//! debug-level stack dump, both routed by the call site's declaring type.

use crate::clock::{Clock, SystemClock};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Receiver of escalation records; must tolerate concurrent calls
pub trait EscalationSink: Send + Sync {
    fn warn(&self, scope: &str, message: &str);
    fn debug(&self, scope: &str, message: &str);
}

/// Sink forwarding to `tracing` with the scope as a structured field
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EscalationSink for TracingSink {
    fn warn(&self, scope: &str, message: &str) {
        tracing::warn!(scope, "{}", message);
    }

    fn debug(&self, scope: &str, message: &str) {
        tracing::debug!(scope, "{}", message);
    }
}

/// Severity of a recorded entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkLevel {
    Warn,
    Debug,
}

impl fmt::Display for SinkLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkLevel::Warn => f.write_str("WARN"),
            SinkLevel::Debug => f.write_str("DEBUG"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRecord {
    pub level: SinkLevel,
    pub scope: String,
    pub message: String,
}

impl fmt::Display for SinkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.level, self.scope, self.message)
    }
}

/// Sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<SinkRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.lock().clone()
    }

    pub fn count(&self, level: SinkLevel) -> usize {
        self.lock().iter().filter(|r| r.level == level).count()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(SinkLevel::Warn)
    }

    pub fn debugs(&self) -> Vec<String> {
        self.messages(SinkLevel::Debug)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn messages(&self, level: SinkLevel) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|r| r.level == level)
            .map(|r| r.message.clone())
            .collect()
    }

    fn push(&self, level: SinkLevel, scope: &str, message: &str) {
        self.lock().push(SinkRecord {
            level,
            scope: scope.to_string(),
            message: message.to_string(),
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SinkRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EscalationSink for MemorySink {
    fn warn(&self, scope: &str, message: &str) {
        self.push(SinkLevel::Warn, scope, message);
    }

    fn debug(&self, scope: &str, message: &str) {
        self.push(SinkLevel::Debug, scope, message);
    }
}

/// Clock and sink shared by the watchdogs of one monitor
#[derive(Clone)]
pub struct Instruments {
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn EscalationSink>,
}

impl Instruments {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn EscalationSink>) -> Self {
        Self { clock, sink }
    }
}

impl Default for Instruments {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for Instruments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruments").finish_non_exhaustive()
    }
}
