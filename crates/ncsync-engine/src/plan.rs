use std::collections::HashMap;

use ncsync_core::{
    Change, ChangeType, Conflict, ConflictKind, ConflictPolicy, ConflictResolution, Direction,
    OperationType, ResolutionAction, SyncConfig, SyncDirection, SyncOperation, SyncPlan, Timestamp,
};

/// Priority assigned to every synthetic `mkdir` and to every operation
/// synthesized from a resolved conflict (spec.md §4.E rule 5, §4.F).
const MKDIR_PRIORITY: i32 = 100;
const CONFLICT_OP_PRIORITY: i32 = 100;

struct IdCounter(u64);

impl IdCounter {
    fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

/// Builds the executable plan from a diff's changes and conflicts (spec.md
/// §4.F). Conflicts are resolved against `config.conflict_policy` here, not
/// deferred to the executor, so the plan's operation list and the
/// conflicts' resolutions are both final by the time this returns.
pub fn build_plan(changes: &[Change], mut conflicts: Vec<Conflict>, config: &SyncConfig, now: Timestamp) -> SyncPlan {
    let mut ids = IdCounter(0);
    let mut mkdirs: HashMap<String, u64> = HashMap::new();
    let mut operations = Vec::new();

    for change in changes {
        let Some(direction) = gate_direction(change, config.direction) else {
            continue;
        };
        push_change_op(change, direction, &mut ids, &mut mkdirs, &mut operations);
    }

    for conflict in &mut conflicts {
        if let Some(op) = resolve_conflict(conflict, config, now, &mut ids, &mut mkdirs, &mut operations) {
            operations.push(op);
        }
    }

    SyncPlan::new(operations, conflicts)
}

/// Clamps a diff-computed change direction to the configured sync mode. A
/// change that diff marked `Bidirectional` (diff rule 8: equal timestamps,
/// differing content) is allowed through under a one-way config only if the
/// side it would need to read from is actually present; under a
/// bidirectional config it is passed through unresolved; the executor
/// resolves it at run time by comparing fresh modification times. Changes
/// that point the wrong way for a one-way config are dropped entirely — a
/// `local_to_remote` run does not pull remote-only files, matching
/// spec.md §6's `direction` input.
fn gate_direction(change: &Change, config_direction: SyncDirection) -> Option<Direction> {
    match (config_direction, change.direction) {
        (SyncDirection::Bidirectional, d) => Some(d),
        (SyncDirection::LocalToRemote, Direction::LocalToRemote) => Some(Direction::LocalToRemote),
        (SyncDirection::LocalToRemote, Direction::Bidirectional) if change.local_meta.is_some() => {
            Some(Direction::LocalToRemote)
        }
        (SyncDirection::RemoteToLocal, Direction::RemoteToLocal) => Some(Direction::RemoteToLocal),
        (SyncDirection::RemoteToLocal, Direction::Bidirectional) if change.remote_meta.is_some() => {
            Some(Direction::RemoteToLocal)
        }
        _ => None,
    }
}

fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Returns the id of the `mkdir` op for `parent`, creating it the first time
/// any change needs it (spec.md §4.F: "inserted once, dedup by target path").
fn ensure_mkdir(parent: &str, ids: &mut IdCounter, mkdirs: &mut HashMap<String, u64>, operations: &mut Vec<SyncOperation>) -> u64 {
    if let Some(&id) = mkdirs.get(parent) {
        return id;
    }
    let id = ids.next();
    operations.push(SyncOperation::new(
        id,
        OperationType::MakeDirectory,
        ChangeType::None,
        Direction::LocalToRemote,
        parent,
        parent,
        0,
        MKDIR_PRIORITY,
    ));
    mkdirs.insert(parent.to_string(), id);
    id
}

fn push_change_op(
    change: &Change,
    direction: Direction,
    ids: &mut IdCounter,
    mkdirs: &mut HashMap<String, u64>,
    operations: &mut Vec<SyncOperation>,
) {
    let size = change.local_meta.as_ref().or(change.remote_meta.as_ref()).map(|m| m.size).unwrap_or(0);

    let mut op = SyncOperation::new(
        ids.next(),
        OperationType::CreateOrUpdate,
        change.change_type,
        direction,
        &change.path,
        &change.path,
        size,
        change.priority,
    );

    attach_remote_mkdir_dependency(&change.path, direction, &mut op, ids, mkdirs, operations);
    operations.push(op);
}

/// A create/update whose effective direction writes to remote gets a
/// dependency on its parent's synthetic `mkdir` (spec.md §4.F: "For any
/// create/update whose remote target has a non-trivial parent directory").
/// `Bidirectional` ops are not wired here since their final direction, and
/// therefore whether a remote write happens at all, is only known once the
/// executor resolves them; `ensure_remote_directory_chain` in the executor
/// covers that case inline instead.
fn attach_remote_mkdir_dependency(
    path: &str,
    direction: Direction,
    op: &mut SyncOperation,
    ids: &mut IdCounter,
    mkdirs: &mut HashMap<String, u64>,
    operations: &mut Vec<SyncOperation>,
) {
    if direction != Direction::LocalToRemote {
        return;
    }
    let Some(parent) = parent_of(path) else { return };
    if parent.is_empty() {
        return;
    }
    let mkdir_id = ensure_mkdir(parent, ids, mkdirs, operations);
    op.dependencies.push(mkdir_id);
}

/// Resolves one conflict against `config.conflict_policy` (spec.md §4.F),
/// recording the resolution on the conflict and returning the operation a
/// winning side needs, if any. `type_changed` always lets the directory
/// side win regardless of policy — an explicit, policy-independent safety
/// rule (spec.md §4.F: "for `type_changed`, the directory side always wins
/// ... regardless of direction (safety)"); the ambiguity of whether
/// `target_wins`'s "symmetric inverse" also inverts that rule is resolved
/// in DESIGN.md by keeping it symmetric across both policies.
fn resolve_conflict(
    conflict: &mut Conflict,
    config: &SyncConfig,
    now: Timestamp,
    ids: &mut IdCounter,
    mkdirs: &mut HashMap<String, u64>,
    operations: &mut Vec<SyncOperation>,
) -> Option<SyncOperation> {
    if matches!(conflict.kind, ConflictKind::PermissionDenied | ConflictKind::StorageError) {
        conflict.resolution = Some(ConflictResolution {
            action: ResolutionAction::Skip,
            path: conflict.path.clone(),
            reason: "errors of this kind always skip".to_string(),
            timestamp: now,
        });
        return None;
    }

    // `force` (spec.md §6) overrides a `skip`/`manual` policy that would
    // otherwise leave the conflict untouched: the caller asked for an
    // overwrite regardless, so fall through to the same source-side
    // resolution `source_wins` would pick. The `type_changed` directory-wins
    // safety rule still applies — `force` widens which policies resolve a
    // conflict, it does not relax the one rule that is policy-independent.
    let (action, direction) = if conflict.kind == ConflictKind::TypeChanged {
        directory_wins(conflict)
    } else if config.force && matches!(config.conflict_policy, ConflictPolicy::Skip | ConflictPolicy::Manual) {
        source_side(config.direction)
    } else {
        match config.conflict_policy {
            ConflictPolicy::Skip => (ResolutionAction::Skip, None),
            ConflictPolicy::Manual => (ResolutionAction::Manual, None),
            ConflictPolicy::SourceWins => source_side(config.direction),
            ConflictPolicy::TargetWins => target_side(config.direction),
        }
    };

    conflict.resolution = Some(ConflictResolution {
        action,
        path: conflict.path.clone(),
        reason: if config.force && matches!(config.conflict_policy, ConflictPolicy::Skip | ConflictPolicy::Manual) && conflict.kind != ConflictKind::TypeChanged {
            "force overrode the configured skip/manual conflict policy".to_string()
        } else {
            format!("{:?} conflict policy", config.conflict_policy)
        },
        timestamp: now,
    });

    let direction = direction?;
    let size = match direction {
        Direction::LocalToRemote => conflict.local_meta.as_ref().map(|m| m.size).unwrap_or(0),
        Direction::RemoteToLocal => conflict.remote_meta.as_ref().map(|m| m.size).unwrap_or(0),
        Direction::Bidirectional | Direction::None => 0,
    };

    let mut op = SyncOperation::new(
        ids.next(),
        OperationType::CreateOrUpdate,
        ChangeType::Update,
        direction,
        &conflict.path,
        &conflict.path,
        size,
        CONFLICT_OP_PRIORITY,
    );
    attach_remote_mkdir_dependency(&conflict.path, direction, &mut op, ids, mkdirs, operations);
    Some(op)
}

fn directory_wins(conflict: &Conflict) -> (ResolutionAction, Option<Direction>) {
    let local_is_dir = conflict.local_meta.as_ref().map(|m| m.is_directory).unwrap_or(false);
    if local_is_dir {
        (ResolutionAction::LocalWins, Some(Direction::LocalToRemote))
    } else {
        (ResolutionAction::RemoteWins, Some(Direction::RemoteToLocal))
    }
}

/// The side a config's `direction` treats as authoritative; `Bidirectional`
/// configs fall back to local, matching the executor's own
/// source-wins-on-tie convention for unresolved bidirectional updates.
fn source_side(direction: SyncDirection) -> (ResolutionAction, Option<Direction>) {
    match direction {
        SyncDirection::RemoteToLocal => (ResolutionAction::RemoteWins, Some(Direction::RemoteToLocal)),
        SyncDirection::LocalToRemote | SyncDirection::Bidirectional => {
            (ResolutionAction::LocalWins, Some(Direction::LocalToRemote))
        }
    }
}

fn target_side(direction: SyncDirection) -> (ResolutionAction, Option<Direction>) {
    match direction {
        SyncDirection::RemoteToLocal => (ResolutionAction::LocalWins, Some(Direction::LocalToRemote)),
        SyncDirection::LocalToRemote | SyncDirection::Bidirectional => {
            (ResolutionAction::RemoteWins, Some(Direction::RemoteToLocal))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ncsync_core::FileMetadata;

    use super::*;

    fn meta(path: &str, size: u64, is_directory: bool) -> FileMetadata {
        FileMetadata {
            path: path.to_string(),
            name: path.to_string(),
            size,
            modified: Timestamp::from_unix_secs(1000),
            etag: String::new(),
            is_directory,
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::new("/tmp/src", "https://example.com/dav", SyncDirection::Bidirectional)
    }

    #[test]
    fn nested_create_gets_a_deduplicated_mkdir_dependency() {
        let changes = vec![
            Change {
                path: "docs/a.txt".into(),
                change_type: ChangeType::Create,
                direction: Direction::LocalToRemote,
                local_meta: Some(meta("docs/a.txt", 10, false)),
                remote_meta: None,
                reason: String::new(),
                priority: 10,
            },
            Change {
                path: "docs/b.txt".into(),
                change_type: ChangeType::Create,
                direction: Direction::LocalToRemote,
                local_meta: Some(meta("docs/b.txt", 20, false)),
                remote_meta: None,
                reason: String::new(),
                priority: 10,
            },
        ];

        let plan = build_plan(&changes, Vec::new(), &config(), Timestamp::from_unix_secs(2000));

        let mkdirs: Vec<_> = plan.operations.iter().filter(|op| op.is_mkdir()).collect();
        assert_eq!(mkdirs.len(), 1);
        assert_eq!(mkdirs[0].priority, MKDIR_PRIORITY);

        let mkdir_id = mkdirs[0].id;
        let creates: Vec<_> = plan.operations.iter().filter(|op| !op.is_mkdir()).collect();
        assert_eq!(creates.len(), 2);
        for create in creates {
            assert_eq!(create.dependencies, vec![mkdir_id]);
        }
    }

    #[test]
    fn remote_only_change_dropped_under_local_to_remote_config() {
        let mut config = config();
        config.direction = SyncDirection::LocalToRemote;

        let changes = vec![Change {
            path: "remote-only.txt".into(),
            change_type: ChangeType::Create,
            direction: Direction::RemoteToLocal,
            local_meta: None,
            remote_meta: Some(meta("remote-only.txt", 5, false)),
            reason: String::new(),
            priority: 10,
        }];

        let plan = build_plan(&changes, Vec::new(), &config, Timestamp::from_unix_secs(2000));
        assert!(plan.operations.is_empty());
    }

    #[test]
    fn type_changed_conflict_lets_the_directory_side_win_under_either_policy() {
        let mut conflict = Conflict {
            path: "x".into(),
            kind: ConflictKind::TypeChanged,
            local_meta: Some(meta("x", 0, true)),
            remote_meta: Some(meta("x", 10, false)),
            description: String::new(),
            timestamp: Timestamp::from_unix_secs(1000),
            resolution: None,
        };

        let mut source_config = config();
        source_config.conflict_policy = ConflictPolicy::SourceWins;
        let op = resolve_conflict(&mut conflict, &source_config, Timestamp::from_unix_secs(2000), &mut IdCounter(0), &mut HashMap::new(), &mut Vec::new());
        assert_eq!(op.unwrap().direction, Direction::LocalToRemote);
        assert_eq!(conflict.resolution.as_ref().unwrap().action, ResolutionAction::LocalWins);

        conflict.resolution = None;
        let mut target_config = config();
        target_config.conflict_policy = ConflictPolicy::TargetWins;
        let op = resolve_conflict(&mut conflict, &target_config, Timestamp::from_unix_secs(2000), &mut IdCounter(0), &mut HashMap::new(), &mut Vec::new());
        assert_eq!(op.unwrap().direction, Direction::LocalToRemote);
    }

    #[test]
    fn permission_denied_conflicts_always_skip() {
        let mut conflict = Conflict {
            path: "locked".into(),
            kind: ConflictKind::PermissionDenied,
            local_meta: None,
            remote_meta: None,
            description: String::new(),
            timestamp: Timestamp::from_unix_secs(1000),
            resolution: None,
        };
        let op = resolve_conflict(&mut conflict, &config(), Timestamp::from_unix_secs(2000), &mut IdCounter(0), &mut HashMap::new(), &mut Vec::new());
        assert!(op.is_none());
        assert_eq!(conflict.resolution.as_ref().unwrap().action, ResolutionAction::Skip);
    }

    #[test]
    fn skip_policy_records_no_operation() {
        let mut conflict = Conflict {
            path: "c.txt".into(),
            kind: ConflictKind::ContentChanged,
            local_meta: Some(meta("c.txt", 10, false)),
            remote_meta: Some(meta("c.txt", 20, false)),
            description: String::new(),
            timestamp: Timestamp::from_unix_secs(1000),
            resolution: None,
        };
        let mut skip_config = config();
        skip_config.conflict_policy = ConflictPolicy::Skip;
        let op = resolve_conflict(&mut conflict, &skip_config, Timestamp::from_unix_secs(2000), &mut IdCounter(0), &mut HashMap::new(), &mut Vec::new());
        assert!(op.is_none());
        assert_eq!(conflict.resolution.as_ref().unwrap().action, ResolutionAction::Skip);
    }

    #[test]
    fn force_overrides_skip_policy_to_source_wins() {
        let mut conflict = Conflict {
            path: "c.txt".into(),
            kind: ConflictKind::ContentChanged,
            local_meta: Some(meta("c.txt", 10, false)),
            remote_meta: Some(meta("c.txt", 20, false)),
            description: String::new(),
            timestamp: Timestamp::from_unix_secs(1000),
            resolution: None,
        };
        let mut forced_config = config();
        forced_config.direction = SyncDirection::LocalToRemote;
        forced_config.conflict_policy = ConflictPolicy::Skip;
        forced_config.force = true;

        let op = resolve_conflict(
            &mut conflict,
            &forced_config,
            Timestamp::from_unix_secs(2000),
            &mut IdCounter(0),
            &mut HashMap::new(),
            &mut Vec::new(),
        );

        assert_eq!(op.unwrap().direction, Direction::LocalToRemote);
        assert_eq!(conflict.resolution.as_ref().unwrap().action, ResolutionAction::LocalWins);
    }

    #[test]
    fn force_does_not_relax_type_changed_directory_safety_rule() {
        let mut conflict = Conflict {
            path: "x".into(),
            kind: ConflictKind::TypeChanged,
            local_meta: Some(meta("x", 0, false)),
            remote_meta: Some(meta("x", 10, true)),
            description: String::new(),
            timestamp: Timestamp::from_unix_secs(1000),
            resolution: None,
        };
        let mut forced_config = config();
        forced_config.conflict_policy = ConflictPolicy::Skip;
        forced_config.force = true;

        let op = resolve_conflict(
            &mut conflict,
            &forced_config,
            Timestamp::from_unix_secs(2000),
            &mut IdCounter(0),
            &mut HashMap::new(),
            &mut Vec::new(),
        );

        // The remote side is the directory here, so it wins regardless of
        // `force` or the configured policy.
        assert_eq!(op.unwrap().direction, Direction::RemoteToLocal);
        assert_eq!(conflict.resolution.as_ref().unwrap().action, ResolutionAction::RemoteWins);
    }

    #[test]
    fn totals_exclude_mkdir_ops_from_file_count() {
        let changes = vec![Change {
            path: "a/b.txt".into(),
            change_type: ChangeType::Create,
            direction: Direction::LocalToRemote,
            local_meta: Some(meta("a/b.txt", 42, false)),
            remote_meta: None,
            reason: String::new(),
            priority: 10,
        }];
        let plan = build_plan(&changes, Vec::new(), &config(), Timestamp::from_unix_secs(2000));
        assert_eq!(plan.totals.total_files, 1);
        assert!(plan.totals.estimated_duration >= Duration::from_secs(1));
    }
}
