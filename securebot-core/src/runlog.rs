//! Run-scoped, append-only scan log.
//!
//! A [`ScanLog`] holds the event history of the most recent pipeline run and
//! is cleared at the start of every new run; a polling client reads it to
//! reconstruct progress without blocking on the pipeline's HTTP response.
//! Components never touch the log directly: the orchestrator threads a
//! [`RunContext`] through every component call, which stamps each entry with
//! the run's repository id and username.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Progress state a log entry reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Cloning,
    Scanning,
    Scanned,
    Fixing,
    CreatingPr,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanLogEntry {
    pub timestamp: DateTime<Utc>,
    pub repo_id: u64,
    pub username: String,
    pub status: ScanStatus,
    pub message: String,
}

/// Shareable in-memory event log for the most recent run.
///
/// Unbounded within a run; lifetime is "most recent pipeline run", not
/// per-repository history.
#[derive(Clone, Default)]
pub struct ScanLog {
    entries: Arc<Mutex<Vec<ScanLogEntry>>>,
}

impl ScanLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all entries from the previous run.
    pub fn clear(&self) {
        self.entries.lock().expect("scan log lock poisoned").clear();
    }

    pub fn append(&self, entry: ScanLogEntry) {
        self.entries
            .lock()
            .expect("scan log lock poisoned")
            .push(entry);
    }

    /// Copy of the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<ScanLogEntry> {
        self.entries.lock().expect("scan log lock poisoned").clone()
    }
}

/// Identity of one pipeline run, threaded through every component call.
#[derive(Clone)]
pub struct RunContext {
    pub repo_id: u64,
    pub username: String,
    log: ScanLog,
}

impl RunContext {
    pub fn new(repo_id: u64, username: impl Into<String>, log: ScanLog) -> Self {
        Self {
            repo_id,
            username: username.into(),
            log,
        }
    }

    /// Append one timestamped entry for this run.
    pub fn record(&self, status: ScanStatus, message: impl Into<String>) {
        self.log.append(ScanLogEntry {
            timestamp: Utc::now(),
            repo_id: self.repo_id,
            username: self.username.clone(),
            status,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stamps_run_identity() {
        let log = ScanLog::new();
        let ctx = RunContext::new(42, "octocat", log.clone());
        ctx.record(ScanStatus::Scanning, "Starting security scan");

        let entries = log.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].repo_id, 42);
        assert_eq!(entries[0].username, "octocat");
        assert_eq!(entries[0].status, ScanStatus::Scanning);
    }

    #[test]
    fn test_clear_drops_previous_run() {
        let log = ScanLog::new();
        let first = RunContext::new(1, "octocat", log.clone());
        first.record(ScanStatus::Scanning, "first run");

        log.clear();
        let second = RunContext::new(2, "octocat", log.clone());
        second.record(ScanStatus::Scanning, "second run");

        let entries = log.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].repo_id, 2);
        assert_eq!(entries[0].message, "second run");
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let value = serde_json::to_value(ScanStatus::CreatingPr).expect("serialize status");
        assert_eq!(value, "creating_pr");
    }

    #[test]
    fn test_snapshot_preserves_append_order() {
        let log = ScanLog::new();
        let ctx = RunContext::new(7, "octocat", log.clone());
        ctx.record(ScanStatus::Cloning, "Cloning repository");
        ctx.record(ScanStatus::Scanning, "Starting security scan");
        ctx.record(ScanStatus::Scanned, "Scan complete: 0 issues found");

        let statuses: Vec<ScanStatus> = log.snapshot().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![ScanStatus::Cloning, ScanStatus::Scanning, ScanStatus::Scanned]
        );
    }
}
