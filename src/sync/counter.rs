//! Per-run counters for one synchronization task.
//!
//! Workers increment lock-free from any thread; the management layer reads a
//! consistent-enough snapshot at any time. Counters reset at the start of
//! each run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe aggregate of one task run.
#[derive(Debug)]
pub struct TaskCounter {
    seen: AtomicU64,
    changeable: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    started_at: Mutex<DateTime<Utc>>,
}

impl TaskCounter {
    /// Create a counter with all fields at zero.
    pub fn new() -> Self {
        Self {
            seen: AtomicU64::new(0),
            changeable: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: Mutex::new(Utc::now()),
        }
    }

    /// Reset all counts for a new run.
    pub fn reset(&self) {
        self.seen.store(0, Ordering::Relaxed);
        self.changeable.store(0, Ordering::Relaxed);
        self.applied.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        let mut started_at = self.started_at.lock().unwrap_or_else(|e| e.into_inner());
        *started_at = Utc::now();
    }

    /// Record one inspected entry.
    pub fn inc_seen(&self) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one entry whose computed modification passed the gate.
    pub fn inc_changeable(&self) {
        self.changeable.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one successfully applied modification.
    pub fn inc_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one failed entry.
    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of the current counts.
    pub fn snapshot(&self) -> CounterSnapshot {
        let started_at = *self.started_at.lock().unwrap_or_else(|e| e.into_inner());
        CounterSnapshot {
            seen: self.seen.load(Ordering::Relaxed),
            changeable: self.changeable.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            started_at,
            taken_at: Utc::now(),
        }
    }
}

impl Default for TaskCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a task run's counters.
#[derive(Debug, Clone, Serialize)]
pub struct CounterSnapshot {
    pub seen: u64,
    pub changeable: u64,
    pub applied: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

impl CounterSnapshot {
    /// Human-readable one-line summary for logs and status output.
    pub fn summary(&self) -> String {
        format!(
            "{} entries seen, {} to change, {} applied, {} failed",
            self.seen, self.changeable, self.applied, self.failed
        )
    }
}
