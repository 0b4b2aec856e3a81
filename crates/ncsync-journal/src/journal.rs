use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use ncsync_core::Timestamp;
use sha2::{Digest, Sha256};

use crate::error::JournalError;
use crate::state::{ResumeState, TransferOperation};

/// Crash-safe on-disk record of in-flight large transfers (spec.md §4.D).
///
/// The in-memory map is guarded by a single mutex; every public method takes
/// it for the duration of both the memory update and the matching disk
/// write, so two concurrent callers never observe (or produce) a torn state
/// (spec.md §5: "linearizable semantics").
pub struct ResumeJournal {
    root: PathBuf,
    max_age: Duration,
    entries: Mutex<HashMap<String, ResumeState>>,
}

impl ResumeJournal {
    /// Opens (creating if absent) the journal directory, owner-only
    /// permissions, and loads any existing `.resume` files into memory.
    pub fn open(root: impl Into<PathBuf>, max_age: Duration) -> Result<Self, JournalError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| JournalError::Directory { path: root.clone(), source })?;
        set_owner_only_dir(&root).map_err(|source| JournalError::Directory { path: root.clone(), source })?;

        let mut entries = HashMap::new();
        let dir = std::fs::read_dir(&root).map_err(|source| JournalError::Directory { path: root.clone(), source })?;
        for entry in dir {
            let entry = entry.map_err(|source| JournalError::Directory { path: root.clone(), source })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("resume") {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|source| JournalError::Io { path: path.clone(), source })?;
            match serde_json::from_slice::<ResumeState>(&bytes) {
                Ok(state) => {
                    entries.insert(state.file_path.clone(), state);
                }
                Err(source) => {
                    tracing::warn!(path = %path.display(), "dropping unreadable resume journal entry");
                    let _ = std::fs::remove_file(&path);
                    let _ = source;
                }
            }
        }

        Ok(ResumeJournal {
            root,
            max_age,
            entries: Mutex::new(entries),
        })
    }

    fn path_for(&self, file_path: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(file_path.as_bytes());
        let digest = hasher.finalize();
        self.root.join(format!("{}.resume", hex_encode(&digest)))
    }

    fn write_entry(&self, state: &ResumeState) -> Result<(), JournalError> {
        let path = self.path_for(&state.file_path);
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|source| JournalError::Corrupt { path: path.clone(), source })?;
        let tmp = path.with_extension("resume.tmp");
        std::fs::write(&tmp, &bytes).map_err(|source| JournalError::Io { path: path.clone(), source })?;
        set_owner_only_file(&tmp).map_err(|source| JournalError::Io { path: path.clone(), source })?;
        std::fs::rename(&tmp, &path).map_err(|source| JournalError::Io { path, source })?;
        Ok(())
    }

    fn remove_entry(&self, file_path: &str) -> Result<(), JournalError> {
        let path = self.path_for(file_path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(JournalError::Io { path, source }),
        }
    }

    /// Starts tracking a transfer. If an existing entry has an equal
    /// `(total_size, last_modified, op)`, its `transferred_size` and
    /// `created_at` are inherited so a resumed upload/download continues
    /// from the last confirmed offset; otherwise a fresh entry is recorded
    /// at offset zero (spec.md §4.D).
    pub fn start(
        &self,
        file_path: &str,
        op: TransferOperation,
        total_size: u64,
        last_modified: Timestamp,
        now: Timestamp,
    ) -> Result<ResumeState, JournalError> {
        let mut entries = self.entries.lock().unwrap();

        let state = match entries.get(file_path) {
            Some(existing) if existing.matches(op, total_size, last_modified) => ResumeState {
                file_path: file_path.to_string(),
                total_size,
                transferred_size: existing.transferred_size,
                checksum: existing.checksum.clone(),
                last_modified,
                operation: op,
                created_at: existing.created_at,
                updated_at: now,
            },
            _ => ResumeState {
                file_path: file_path.to_string(),
                total_size,
                transferred_size: 0,
                checksum: None,
                last_modified,
                operation: op,
                created_at: now,
                updated_at: now,
            },
        };

        self.write_entry(&state)?;
        entries.insert(file_path.to_string(), state.clone());
        Ok(state)
    }

    /// Bumps `transferred_size` and `updated_at` after a successful chunk.
    pub fn update(
        &self,
        file_path: &str,
        transferred: u64,
        checksum: Option<String>,
        now: Timestamp,
    ) -> Result<(), JournalError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(existing) = entries.get(file_path) else {
            return Ok(());
        };
        let mut state = existing.clone();
        state.transferred_size = transferred;
        state.updated_at = now;
        if checksum.is_some() {
            state.checksum = checksum;
        }
        self.write_entry(&state)?;
        entries.insert(file_path.to_string(), state);
        Ok(())
    }

    /// Removes the entry, on disk and in memory, once a transfer finishes.
    pub fn complete(&self, file_path: &str) -> Result<(), JournalError> {
        let mut entries = self.entries.lock().unwrap();
        self.remove_entry(file_path)?;
        entries.remove(file_path);
        Ok(())
    }

    /// Returns an entry only if `(op, total_size, last_modified)` all match
    /// and it has not aged out past `max_age`; a mismatched or stale entry is
    /// treated as absent and reaped on the spot (spec.md §4.D).
    pub fn get(
        &self,
        file_path: &str,
        op: TransferOperation,
        total_size: u64,
        last_modified: Timestamp,
        now: Timestamp,
    ) -> Result<Option<ResumeState>, JournalError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(existing) = entries.get(file_path).cloned() else {
            return Ok(None);
        };

        let age = now.abs_diff(existing.updated_at);
        if !existing.matches(op, total_size, last_modified) || age >= self.max_age {
            drop(entries);
            self.remove_entry(file_path)?;
            self.entries.lock().unwrap().remove(file_path);
            return Ok(None);
        }

        Ok(Some(existing))
    }

    /// Reaps every entry older than `max_age`, independent of any particular
    /// lookup (spec.md §4.D: "reaped after a configurable max age").
    pub fn reap_expired(&self, now: Timestamp) -> Result<usize, JournalError> {
        let stale: Vec<String> = {
            let entries = self.entries.lock().unwrap();
            entries
                .values()
                .filter(|state| now.abs_diff(state.updated_at) >= self.max_age)
                .map(|state| state.file_path.clone())
                .collect()
        };
        for file_path in &stale {
            self.complete(file_path)?;
        }
        Ok(stale.len())
    }

    pub fn active_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(unix)]
fn set_owner_only_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_owner_only_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_file(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only_file(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn now_monotonic_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Convenience for callers that don't already carry a `Timestamp` for "now".
pub fn now() -> Timestamp {
    Timestamp::from_unix_millis(now_monotonic_ms())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs)
    }

    #[test]
    fn start_on_fresh_path_begins_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ResumeJournal::open(dir.path(), Duration::from_secs(86_400)).unwrap();

        let state = journal
            .start("big.iso", TransferOperation::Upload, 100, ts(1000), ts(1000))
            .unwrap();
        assert_eq!(state.transferred_size, 0);
        assert_eq!(state.created_at, ts(1000));
    }

    #[test]
    fn restart_with_matching_signature_inherits_progress() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ResumeJournal::open(dir.path(), Duration::from_secs(86_400)).unwrap();

        journal
            .start("big.iso", TransferOperation::Upload, 100, ts(1000), ts(1000))
            .unwrap();
        journal.update("big.iso", 40, None, ts(1010)).unwrap();

        // Simulate a crash and restart: a fresh `ResumeJournal` handle over
        // the same directory should still see the persisted progress.
        let reopened = ResumeJournal::open(dir.path(), Duration::from_secs(86_400)).unwrap();
        let resumed = reopened
            .get("big.iso", TransferOperation::Upload, 100, ts(1000), ts(1011))
            .unwrap()
            .expect("entry still present");
        assert_eq!(resumed.transferred_size, 40);
    }

    #[test]
    fn get_rejects_mismatched_signature_and_reaps_it() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ResumeJournal::open(dir.path(), Duration::from_secs(86_400)).unwrap();

        journal
            .start("big.iso", TransferOperation::Upload, 100, ts(1000), ts(1000))
            .unwrap();

        // Size changed underneath us: treated as a different transfer.
        let result = journal
            .get("big.iso", TransferOperation::Upload, 999, ts(1000), ts(1001))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(journal.active_count(), 0);
    }

    #[test]
    fn get_rejects_stale_entry_past_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ResumeJournal::open(dir.path(), Duration::from_secs(60)).unwrap();

        journal
            .start("big.iso", TransferOperation::Upload, 100, ts(1000), ts(1000))
            .unwrap();

        let result = journal
            .get("big.iso", TransferOperation::Upload, 100, ts(1000), ts(1000 + 61))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn complete_removes_entry_from_disk_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ResumeJournal::open(dir.path(), Duration::from_secs(86_400)).unwrap();

        journal
            .start("big.iso", TransferOperation::Upload, 100, ts(1000), ts(1000))
            .unwrap();
        journal.complete("big.iso").unwrap();

        assert_eq!(journal.active_count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn reap_expired_sweeps_all_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ResumeJournal::open(dir.path(), Duration::from_secs(60)).unwrap();

        journal
            .start("a.iso", TransferOperation::Upload, 100, ts(1000), ts(1000))
            .unwrap();
        journal
            .start("b.iso", TransferOperation::Upload, 100, ts(1000), ts(1000 + 59))
            .unwrap();

        let reaped = journal.reap_expired(ts(1000 + 61)).unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(journal.active_count(), 1);
    }
}
