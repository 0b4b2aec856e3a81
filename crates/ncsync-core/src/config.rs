use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    LocalToRemote,
    RemoteToLocal,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConflictPolicy {
    #[default]
    SourceWins,
    TargetWins,
    Skip,
    Manual,
}

/// Already-decrypted credentials; the credential store is an opaque, external
/// dependency (spec.md §1 non-goals). Zeroed on drop so a stray `Debug` print
/// or a lingering heap allocation never leaks the password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    app_password: Vec<u8>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, app_password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            app_password: app_password.into().into_bytes(),
        }
    }

    pub fn app_password(&self) -> &str {
        std::str::from_utf8(&self.app_password).unwrap_or_default()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("app_password", &"<redacted>")
            .finish()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        for byte in self.app_password.iter_mut() {
            *byte = 0;
        }
    }
}

/// Tunables for one sync run; constructed entirely by the caller (spec.md §6).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: String,
    pub target: String,
    pub direction: SyncDirection,
    pub dry_run: bool,
    pub force: bool,
    pub exclude_patterns: Vec<String>,
    pub max_retries: u32,
    pub timeout: Duration,
    pub chunk_size: u64,
    pub large_file_threshold: u64,
    pub conflict_policy: ConflictPolicy,
    /// Two timestamps within this window are considered equal (spec.md §4.E).
    pub mod_time_tolerance: Duration,
    /// Journal entries older than this are treated as absent and reaped (spec.md §4.D).
    pub journal_max_age: Duration,
}

impl SyncConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
    pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 50 * 1024 * 1024;
    pub const DEFAULT_MOD_TIME_TOLERANCE: Duration = Duration::from_secs(1);
    pub const DEFAULT_JOURNAL_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(source: impl Into<String>, target: impl Into<String>, direction: SyncDirection) -> Self {
        SyncConfig {
            source: source.into(),
            target: target.into(),
            direction,
            dry_run: false,
            force: false,
            exclude_patterns: Vec::new(),
            max_retries: Self::DEFAULT_MAX_RETRIES,
            timeout: Self::DEFAULT_TIMEOUT,
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            large_file_threshold: Self::DEFAULT_LARGE_FILE_THRESHOLD,
            conflict_policy: ConflictPolicy::default(),
            mod_time_tolerance: Self::DEFAULT_MOD_TIME_TOLERANCE,
            journal_max_age: Self::DEFAULT_JOURNAL_MAX_AGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = SyncConfig::new("/tmp/src", "https://example.com", SyncDirection::LocalToRemote);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.large_file_threshold, 50 * 1024 * 1024);
        assert_eq!(config.conflict_policy, ConflictPolicy::SourceWins);
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("hunter2"));
    }
}
