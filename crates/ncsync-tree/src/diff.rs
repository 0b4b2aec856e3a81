use std::collections::BTreeSet;
use std::time::Duration;

use ncsync_core::{
    normalize_etag, Change, ChangeType, Conflict, ConflictKind, Direction, FileMetadata, Timestamp,
};

use crate::tree::FileTree;

/// Tunables for metadata equality (spec.md §4.E).
#[derive(Debug, Clone, Copy)]
pub struct ComparisonOptions {
    pub ignore_mod_time_diff: Duration,
    pub compare_size: bool,
    pub compare_etags: bool,
}

impl Default for ComparisonOptions {
    fn default() -> Self {
        ComparisonOptions {
            ignore_mod_time_diff: Duration::from_secs(1),
            compare_size: true,
            compare_etags: true,
        }
    }
}

/// "Both edited recently" window for the ETag-divergence conflict trigger
/// (spec.md §4.E).
const RECENT_EDIT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Two entries are equal under the configured comparison options: modified
/// times within tolerance, and (if enabled) matching sizes and ETags.
pub fn files_equal(local: &FileMetadata, remote: &FileMetadata, opts: &ComparisonOptions) -> bool {
    if local.is_directory != remote.is_directory {
        return false;
    }
    if !local.modified.within(remote.modified, opts.ignore_mod_time_diff) {
        return false;
    }
    if opts.compare_size && local.size != remote.size {
        return false;
    }
    if opts.compare_etags {
        let (l, r) = (normalize_etag(&local.etag), normalize_etag(&remote.etag));
        if !l.is_empty() && !r.is_empty() && l != r {
            return false;
        }
    }
    true
}

/// Diagnoses a conflict between two present-on-both-sides entries that are
/// not trivially equal (spec.md §4.E). Returns `None` when the difference is
/// an ordinary one-sided-newer update, not a conflict.
fn detect_conflict(local: &FileMetadata, remote: &FileMetadata, opts: &ComparisonOptions) -> Option<ConflictKind> {
    if local.is_directory != remote.is_directory {
        return Some(ConflictKind::TypeChanged);
    }

    if local.modified.within(remote.modified, opts.ignore_mod_time_diff) && local.size != remote.size {
        return Some(ConflictKind::ContentChanged);
    }

    let (l_etag, r_etag) = (normalize_etag(&local.etag), normalize_etag(&remote.etag));
    if local.modified.within(remote.modified, RECENT_EDIT_WINDOW) && !l_etag.is_empty() && !r_etag.is_empty() && l_etag != r_etag {
        return Some(ConflictKind::ContentChanged);
    }

    None
}

/// Priority of a change candidate: base 10, plus size and recency bonuses,
/// minus a directory penalty, plus a root-level-file bonus (spec.md §4.E).
/// Size and recency tiers are mutually exclusive (the highest applicable
/// bonus only) — an open question in spec.md resolved in DESIGN.md.
pub fn priority(meta: &FileMetadata, now: Timestamp) -> i32 {
    const MIB: u64 = 1024 * 1024;

    let mut score = 10i32;

    score += if meta.size > 100 * MIB {
        30
    } else if meta.size > 10 * MIB {
        20
    } else if meta.size > MIB {
        10
    } else {
        0
    };

    let age = now.abs_diff(meta.modified);
    score += if age <= Duration::from_secs(3600) {
        15
    } else if age <= Duration::from_secs(24 * 3600) {
        10
    } else {
        0
    };

    if meta.is_directory {
        score -= 5;
    } else if !meta.path.contains('/') {
        score += 5;
    }

    score
}

/// Classifies every path present on either side (spec.md §4.E rules 1–8).
/// Conflicting paths are reported only in the conflicts list — the resolver
/// (`ncsync-engine`) turns a resolved conflict back into an operation per
/// the configured policy, so they are deliberately not duplicated here as
/// `Change`s.
pub fn detect_changes(
    local: &FileTree,
    remote: &FileTree,
    opts: &ComparisonOptions,
    now: Timestamp,
) -> (Vec<Change>, Vec<Conflict>) {
    let mut paths: BTreeSet<&str> = BTreeSet::new();
    paths.extend(local.paths());
    paths.extend(remote.paths());

    let mut changes = Vec::new();
    let mut conflicts = Vec::new();

    for path in paths {
        if path.is_empty() {
            continue;
        }

        let local_meta = local.get(path);
        let remote_meta = remote.get(path);

        match (local_meta, remote_meta) {
            (None, None) => {}

            (Some(l), None) => changes.push(Change {
                path: path.to_string(),
                change_type: ChangeType::Create,
                direction: Direction::LocalToRemote,
                local_meta: Some(l.clone()),
                remote_meta: None,
                reason: "present locally only".to_string(),
                priority: priority(l, now),
            }),

            (None, Some(r)) => changes.push(Change {
                path: path.to_string(),
                change_type: ChangeType::Create,
                direction: Direction::RemoteToLocal,
                local_meta: None,
                remote_meta: Some(r.clone()),
                reason: "present remotely only".to_string(),
                priority: priority(r, now),
            }),

            (Some(l), Some(r)) => {
                if files_equal(l, r, opts) {
                    continue;
                }

                if let Some(kind) = detect_conflict(l, r, opts) {
                    conflicts.push(Conflict {
                        path: path.to_string(),
                        kind,
                        local_meta: Some(l.clone()),
                        remote_meta: Some(r.clone()),
                        description: conflict_description(kind, l, r),
                        timestamp: now,
                        resolution: None,
                    });
                    continue;
                }

                if l.modified.is_strictly_newer_than(r.modified, opts.ignore_mod_time_diff) {
                    changes.push(Change {
                        path: path.to_string(),
                        change_type: ChangeType::Update,
                        direction: Direction::LocalToRemote,
                        local_meta: Some(l.clone()),
                        remote_meta: Some(r.clone()),
                        reason: "local is newer".to_string(),
                        priority: priority(l, now),
                    });
                } else if r.modified.is_strictly_newer_than(l.modified, opts.ignore_mod_time_diff) {
                    changes.push(Change {
                        path: path.to_string(),
                        change_type: ChangeType::Update,
                        direction: Direction::RemoteToLocal,
                        local_meta: Some(l.clone()),
                        remote_meta: Some(r.clone()),
                        reason: "remote is newer".to_string(),
                        priority: priority(r, now),
                    });
                } else {
                    changes.push(Change {
                        path: path.to_string(),
                        change_type: ChangeType::Update,
                        direction: Direction::Bidirectional,
                        local_meta: Some(l.clone()),
                        remote_meta: Some(r.clone()),
                        reason: "equal modification times, differing content".to_string(),
                        priority: 50,
                    });
                }
            }
        }
    }

    (changes, conflicts)
}

fn conflict_description(kind: ConflictKind, local: &FileMetadata, remote: &FileMetadata) -> String {
    match kind {
        ConflictKind::TypeChanged => format!(
            "{}: local is_directory={} but remote is_directory={}",
            local.path, local.is_directory, remote.is_directory
        ),
        ConflictKind::ContentChanged => format!(
            "{}: local size={} remote size={} (mtimes within tolerance or both recently edited)",
            local.path, local.size, remote.size
        ),
        other => format!("{}: {other:?}", local.path),
    }
}
