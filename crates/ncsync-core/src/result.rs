use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::change::Conflict;
use crate::metadata::Timestamp;

/// Outcome of one sync run; the sole return value of `ncsync-engine::run_sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub created_files: Vec<String>,
    pub updated_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub skipped_files: Vec<SkippedEntry>,
    pub conflicts: Vec<Conflict>,
    /// Path + verb + kind, credential- and URL-free (spec.md §7).
    pub errors: Vec<String>,
    pub warnings: Vec<String>,

    pub processed_files: usize,
    pub transferred_size: u64,

    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    pub elapsed: Duration,

    pub success: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub path: String,
    pub reason: String,
}

impl SyncResult {
    pub fn empty(dry_run: bool, started_at: Timestamp) -> Self {
        SyncResult {
            created_files: Vec::new(),
            updated_files: Vec::new(),
            deleted_files: Vec::new(),
            skipped_files: Vec::new(),
            conflicts: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            processed_files: 0,
            transferred_size: 0,
            started_at,
            ended_at: started_at,
            elapsed: Duration::ZERO,
            success: true,
            dry_run,
        }
    }

    /// Finalizes timing and the success flag; success is independent of conflicts.
    pub fn finish(&mut self, ended_at: Timestamp) {
        self.ended_at = ended_at;
        self.elapsed = Duration::from_millis(
            (ended_at.unix_millis() - self.started_at.unix_millis()).max(0) as u64,
        );
        self.success = self.errors.is_empty();
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn record_skip(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.skipped_files.push(SkippedEntry {
            path: path.into(),
            reason: reason.into(),
        });
    }
}
