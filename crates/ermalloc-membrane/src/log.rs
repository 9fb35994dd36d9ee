//! Structured lifecycle log.
//!
//! Every facade operation appends one [`LifecycleRecord`]. Records are kept in
//! a bounded ring (oldest dropped first) and serialize to JSON lines.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Lifecycle record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string (case-insensitive); unknown values map to `Warn`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "error" => Self::Error,
            _ => Self::Warn,
        }
    }
}

/// One facade event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleRecord {
    /// Monotonic event id.
    pub decision_id: u64,
    /// Correlation id, `ermalloc::heap::{symbol}::{decision_id:016x}`.
    pub trace_id: String,
    pub level: LogLevel,
    /// API symbol (`er_malloc`, `er_read_buf`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `setup`, `correct`, ...).
    pub event: &'static str,
    pub handle: Option<usize>,
    pub logical_size: Option<usize>,
    pub physical_size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    pub details: String,
}

impl LifecycleRecord {
    /// Single-line JSON form.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Fields of a record before it is stamped with ids.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: LogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub handle: Option<usize>,
    pub logical_size: Option<usize>,
    pub physical_size: Option<usize>,
    pub outcome: &'static str,
    pub details: String,
}

impl LogEvent {
    #[must_use]
    pub fn new(level: LogLevel, symbol: &'static str, event: &'static str) -> Self {
        Self {
            level,
            symbol,
            event,
            handle: None,
            logical_size: None,
            physical_size: None,
            outcome: "ok",
            details: String::new(),
        }
    }

    #[must_use]
    pub fn handle(mut self, handle: usize) -> Self {
        self.handle = Some(handle);
        self
    }

    #[must_use]
    pub fn sizes(mut self, logical: usize, physical: usize) -> Self {
        self.logical_size = Some(logical);
        self.physical_size = Some(physical);
        self
    }

    #[must_use]
    pub fn outcome(mut self, outcome: &'static str) -> Self {
        self.outcome = outcome;
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Bounded, thread-safe record sink.
#[derive(Debug)]
pub struct LifecycleLog {
    min_level: Option<LogLevel>,
    capacity: usize,
    next_decision_id: AtomicU64,
    records: Mutex<VecDeque<LifecycleRecord>>,
}

impl LifecycleLog {
    /// `min_level == None` discards everything.
    #[must_use]
    pub fn new(min_level: Option<LogLevel>, capacity: usize) -> Self {
        Self {
            min_level,
            capacity,
            next_decision_id: AtomicU64::new(1),
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.capacity > 0 && self.min_level.is_some_and(|min| level >= min)
    }

    pub fn emit(&self, event: LogEvent) {
        if !self.enabled(event.level) {
            return;
        }
        let decision_id = self.next_decision_id.fetch_add(1, Ordering::Relaxed);
        let record = LifecycleRecord {
            decision_id,
            trace_id: format!("ermalloc::heap::{}::{:016x}", event.symbol, decision_id),
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            handle: event.handle,
            logical_size: event.logical_size,
            physical_size: event.physical_size,
            outcome: event.outcome,
            details: event.details,
        };
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Copy of the retained records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<LifecycleRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Retained records as JSON lines.
    #[must_use]
    pub fn export_jsonl(&self) -> String {
        let records = self.records.lock();
        let mut out = String::new();
        for record in records.iter() {
            out.push_str(&record.to_jsonl());
            out.push('\n');
        }
        out
    }

    /// Remove and return all retained records.
    pub fn drain(&self) -> Vec<LifecycleRecord> {
        self.records.lock().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
