//! Wires the matcher, URL model, WebDAV transport, resume journal, tree
//! builder, and planner/executor into the single entry point a caller needs
//! to run one synchronization (spec.md §4.F, §5).

pub mod executor;
pub mod plan;

use std::path::PathBuf;

use ncsync_core::{Credentials, SyncConfig, SyncResult, Timestamp};
use ncsync_journal::ResumeJournal;
use ncsync_match::{assemble_patterns, Matcher};
use ncsync_tree::{build_local_tree, build_remote_tree, detect_changes, ComparisonOptions};
use ncsync_url::{is_remote, parse_remote_url};
use ncsync_webdav::{BasicAuthProvider, HttpWebDavClient, RetryConfig};
use tokio_util::sync::CancellationToken;

/// Name of the directory (under the local sync root) that holds
/// `ResumeJournal`'s `.resume` files. `SyncConfig` has no field for this
/// since spec.md §6 doesn't surface one; see DESIGN.md for why the local
/// root was chosen over a separate configured path.
const JOURNAL_DIR_NAME: &str = ".ncsync-journal";

/// Runs one sync between `config.source` and `config.target`, exactly one of
/// which must be a `scheme://` remote location (spec.md §1, §6). Returns once
/// every planned operation has settled (completed, failed, or skipped) or
/// `cancel` fires.
pub async fn run_sync(config: SyncConfig, credentials: Credentials, cancel: CancellationToken) -> anyhow::Result<SyncResult> {
    let started_at = now();
    let mut result = SyncResult::empty(config.dry_run, started_at);

    let (local_root, webdav_location) = resolve_roots(&config)?;

    let auth = BasicAuthProvider::from_credentials(&credentials);
    let retry = RetryConfig {
        max_retries: config.max_retries,
        ..RetryConfig::default()
    };
    let transport = HttpWebDavClient::new(webdav_location.base_url.clone(), auth, config.timeout, retry)?;

    // Assembly order per spec.md §4.A: built-in defaults, then an optional
    // `.nextcloudignore` in the local source, then CLI-supplied patterns.
    let patterns = assemble_patterns(&local_root, &config.exclude_patterns)?;
    let matcher = Matcher::compile(&patterns)?;

    let journal = ResumeJournal::open(local_root.join(JOURNAL_DIR_NAME), config.journal_max_age)?;

    tracing::info!(
        source = %config.source,
        target = %config.target,
        direction = ?config.direction,
        dry_run = config.dry_run,
        "starting sync run"
    );

    let local_tree = build_local_tree(&local_root, &matcher)?;
    let remote_tree = build_remote_tree(&transport, &webdav_location.webdav_path, &matcher, &cancel).await?;

    let compare = ComparisonOptions {
        ignore_mod_time_diff: config.mod_time_tolerance,
        compare_size: true,
        compare_etags: true,
    };
    let now_ts = now();
    let (changes, conflicts) = detect_changes(&local_tree, &remote_tree, &compare, now_ts);

    let plan = plan::build_plan(&changes, conflicts, &config, now_ts);

    executor::execute_plan(&plan, &local_root, &webdav_location.webdav_path, &transport, &journal, &config, &cancel, &mut result).await;

    let reaped = journal.reap_expired(now())?;
    if reaped > 0 {
        tracing::debug!(reaped, "swept stale resume journal entries");
    }

    result.finish(now());
    tracing::info!(
        created = result.created_files.len(),
        updated = result.updated_files.len(),
        deleted = result.deleted_files.len(),
        skipped = result.skipped_files.len(),
        conflicts = result.conflicts.len(),
        errors = result.errors.len(),
        elapsed_ms = result.elapsed.as_millis() as u64,
        "finished sync run"
    );

    Ok(result)
}

/// Picks which of `config.source`/`config.target` is the local filesystem
/// root and which is the remote WebDAV location. Exactly one side must be
/// remote (spec.md §1: "between a local directory subtree and a remote
/// WebDAV-speaking server").
fn resolve_roots(config: &SyncConfig) -> anyhow::Result<(PathBuf, ncsync_url::RemoteLocation)> {
    match (is_remote(&config.source), is_remote(&config.target)) {
        (false, true) => Ok((PathBuf::from(&config.source), parse_remote_url(&config.target)?)),
        (true, false) => Ok((PathBuf::from(&config.target), parse_remote_url(&config.source)?)),
        (true, true) => anyhow::bail!("both source and target are remote locations"),
        (false, false) => anyhow::bail!("neither source nor target is a remote location"),
    }
}

fn now() -> Timestamp {
    ncsync_journal::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_roots_rejects_two_remote_locations() {
        let config = SyncConfig::new(
            "https://a.example.com/remote.php/dav/files/alice",
            "https://b.example.com/remote.php/dav/files/alice",
            ncsync_core::SyncDirection::Bidirectional,
        );
        assert!(resolve_roots(&config).is_err());
    }

    #[test]
    fn resolve_roots_rejects_two_local_paths() {
        let config = SyncConfig::new("/tmp/a", "/tmp/b", ncsync_core::SyncDirection::Bidirectional);
        assert!(resolve_roots(&config).is_err());
    }

    #[test]
    fn resolve_roots_accepts_local_source_remote_target() {
        let config = SyncConfig::new(
            "/tmp/src",
            "https://cloud.example.com/remote.php/dav/files/alice",
            ncsync_core::SyncDirection::LocalToRemote,
        );
        let (local, remote) = resolve_roots(&config).unwrap();
        assert_eq!(local, PathBuf::from("/tmp/src"));
        assert!(remote.webdav_path.contains("/alice"));
    }
}
