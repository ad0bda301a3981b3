//! Operator log for backup and restore runs
//!
//! The coordinator reports every per-kind and per-item outcome through a
//! [`LogSink`]. This is the operator-facing record of a run, separate from the
//! `tracing` diagnostics.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Success,
    Error,
    Info,
}

impl LogLevel {
    pub fn icon(&self) -> &'static str {
        match self {
            LogLevel::Success => "✅",
            LogLevel::Error => "❌",
            LogLevel::Info => "ℹ️",
        }
    }
}

/// Which half of a run produced an entry. Override restores run a backup
/// first, so one restore log carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogPhase {
    Backup,
    Restore,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub level: LogLevel,
    pub phase: LogPhase,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, phase: LogPhase, message: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            level,
            phase,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.at.format("%H:%M:%S"),
            self.level.icon(),
            self.message
        )
    }
}

/// Destination for operator log entries
pub trait LogSink: Send + Sync {
    fn append(&self, entry: LogEntry);
}

/// Collects entries in order; used by tests and callers that render the log later
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Entries of one phase and level
    pub fn filtered(&self, phase: LogPhase, level: LogLevel) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.phase == phase && e.level == level)
            .collect()
    }
}

impl LogSink for MemoryLog {
    fn append(&self, entry: LogEntry) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }
}

/// Prints entries to stdout as they arrive
pub struct ConsoleLog;

impl LogSink for ConsoleLog {
    fn append(&self, entry: LogEntry) {
        tracing::debug!(level = ?entry.level, phase = ?entry.phase, "{}", entry.message);
        println!("{entry}");
    }
}
