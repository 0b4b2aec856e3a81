use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A point in time with millisecond precision, measured from the Unix epoch.
///
/// Both local filesystem timestamps and remote `getlastmodified` values are
/// normalized into this type so the comparator in `ncsync-tree` never has to
/// reason about two different clock representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const UNIX_EPOCH: Timestamp = Timestamp(0);

    pub fn from_unix_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub fn from_unix_secs(secs: i64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    pub fn unix_millis(self) -> i64 {
        self.0
    }

    pub fn from_system_time(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp(d.as_millis() as i64),
            Err(e) => Timestamp(-(e.duration().as_millis() as i64)),
        }
    }

    /// Absolute difference between two timestamps.
    pub fn abs_diff(self, other: Timestamp) -> Duration {
        Duration::from_millis(self.0.abs_diff(other.0))
    }

    /// `self` is strictly newer than `other`, outside of `tolerance`.
    pub fn is_strictly_newer_than(self, other: Timestamp, tolerance: Duration) -> bool {
        self.0 > other.0 && self.abs_diff(other) > tolerance
    }

    pub fn within(self, other: Timestamp, tolerance: Duration) -> bool {
        self.abs_diff(other) <= tolerance
    }
}

/// The shared description of one filesystem entry, local or remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Relative to the sync root, forward-slash normalized. `""` denotes the root.
    pub path: String,
    /// Last path segment; `""` for the root.
    pub name: String,
    /// Bytes; 0 for directories.
    pub size: u64,
    pub modified: Timestamp,
    /// Opaque, quoted or unquoted; empty for most local entries.
    pub etag: String,
    pub is_directory: bool,
}

impl FileMetadata {
    pub fn root() -> Self {
        FileMetadata {
            path: String::new(),
            name: String::new(),
            size: 0,
            modified: Timestamp::UNIX_EPOCH,
            etag: String::new(),
            is_directory: true,
        }
    }

    /// ETag normalization per the glossary: trim spaces and surrounding quotes.
    pub fn normalized_etag(&self) -> &str {
        normalize_etag(&self.etag)
    }
}

pub fn normalize_etag(etag: &str) -> &str {
    let trimmed = etag.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_quoted_and_spaced_etags() {
        assert_eq!(normalize_etag(" \"abc123\" "), "abc123");
        assert_eq!(normalize_etag("abc123"), "abc123");
        assert_eq!(normalize_etag(""), "");
    }

    #[test]
    fn timestamp_tolerance_window() {
        let a = Timestamp::from_unix_secs(1000);
        let b = Timestamp::from_unix_secs(1000) ;
        let b = Timestamp(b.0 + 900);
        assert!(a.within(b, Duration::from_secs(1)));
        assert!(!a.is_strictly_newer_than(b, Duration::from_secs(1)));

        let c = Timestamp(a.0 + 5000);
        assert!(c.is_strictly_newer_than(a, Duration::from_secs(1)));
    }
}
