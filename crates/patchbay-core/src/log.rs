//! Multi-producer log queue
//!
//! Workers append to a private [`LogBuffer`] and periodically swap it into a
//! shared buffer the supervisor drains. Entries are unstamped until drained;
//! timestamps are assigned when they reach the aggregated queue.

use crate::time::unix_millis;

/// Log severity. `Send`/`Recv` mark packet traffic so the observer can
/// filter it from operational messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Send,
    Recv,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Send => "send",
            Severity::Recv => "recv",
        }
    }
}

/// An unstamped worker-side record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub severity: Severity,
    pub message: String,
}

/// A drained, timestamped entry as handed to the observer.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: Severity,
    pub timestamp_ms: u64,
    pub message: String,
}

/// Accumulating log buffer, drained by swap.
#[derive(Debug, Default)]
pub struct LogBuffer {
    records: Vec<LogRecord>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, severity: Severity, message: impl Into<String>) {
        self.records.push(LogRecord {
            severity,
            message: message.into(),
        });
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.add(Severity::Debug, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.add(Severity::Info, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.add(Severity::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.add(Severity::Error, message);
    }

    pub fn send(&mut self, message: impl Into<String>) {
        self.add(Severity::Send, message);
    }

    pub fn recv(&mut self, message: impl Into<String>) {
        self.add(Severity::Recv, message);
    }

    /// Move every record from `other` into this buffer, preserving order.
    pub fn append(&mut self, other: &mut LogBuffer) {
        self.records.append(&mut other.records);
    }

    /// Take all buffered records, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<LogRecord> {
        std::mem::take(&mut self.records)
    }

    /// Drain into the observer's queue, stamping entries now.
    pub fn drain_into(&mut self, out: &mut Vec<LogEntry>) {
        let now = unix_millis();
        for record in self.records.drain(..) {
            out.push(LogEntry {
                severity: record.severity,
                timestamp_ms: now,
                message: record.message,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
