use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ncsync_core::{
    format_op_error, Conflict, ConflictKind, ConflictResolution, Direction, ErrorKind, OperationState, OperationType,
    ResolutionAction, SyncConfig, SyncOperation, SyncPlan, SyncResult, Timestamp,
};
use ncsync_journal::{now as journal_now, ResumeJournal, TransferOperation};
use ncsync_webdav::{HashingReader, HashingWriter, WebDavError, WebDavTransport};
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;

/// Runs every operation in `plan`, highest priority first, honoring
/// dependencies, the configured conflict resolutions already recorded on
/// `plan.conflicts`, and `config.dry_run` (spec.md §4.F).
///
/// `local_root` is the local filesystem directory being synchronized;
/// `webdav_root` is the absolute collection path on the server. Both sides
/// of every operation are addressed by the same forward-slash relative
/// path carried in `SyncOperation::target_path`.
pub async fn execute_plan<T: WebDavTransport>(
    plan: &SyncPlan,
    local_root: &Path,
    webdav_root: &str,
    transport: &T,
    journal: &ResumeJournal,
    config: &SyncConfig,
    cancel: &CancellationToken,
    result: &mut SyncResult,
) {
    result.conflicts = plan.conflicts.clone();

    let mut ops: Vec<SyncOperation> = plan.operations.clone();
    ops.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut completed: HashSet<u64> = HashSet::new();

    for op in &mut ops {
        if cancel.is_cancelled() {
            result.record_error(format_op_error(&op.target_path, "RUN", ErrorKind::Cancelled));
            break;
        }

        if !op.dependencies.iter().all(|dep| completed.contains(dep)) {
            op.state = OperationState::Skipped;
            result.record_skip(op.target_path.clone(), "dependencies not satisfied");
            continue;
        }

        op.state = OperationState::Running;

        if config.dry_run {
            record_dry_run(op, result);
            op.state = OperationState::Completed;
            completed.insert(op.id);
            continue;
        }

        let outcome = execute_one(op, local_root, webdav_root, transport, journal, config, cancel, result).await;
        match outcome {
            Ok(()) => {
                op.state = OperationState::Completed;
                completed.insert(op.id);
            }
            Err(error) => {
                op.state = OperationState::Failed;
                let run_fatal = error.kind().is_run_fatal();
                handle_operation_error(op, error, result);
                if run_fatal {
                    break;
                }
            }
        }
    }
}

fn record_dry_run(op: &SyncOperation, result: &mut SyncResult) {
    use ncsync_core::ChangeType;
    match op.op_type {
        OperationType::MakeDirectory => {}
        OperationType::CreateOrUpdate => match op.change_type {
            ChangeType::Create => result.created_files.push(op.target_path.clone()),
            _ => result.updated_files.push(op.target_path.clone()),
        },
        OperationType::Delete => result.deleted_files.push(op.target_path.clone()),
        OperationType::Move => result.updated_files.push(op.target_path.clone()),
    }
    result.processed_files += 1;
}

/// Converts a transport failure that spec.md §7 classifies as
/// `permission`/`storage_quota` into a conflict instead of a plain error,
/// and everything else into a recorded error string. `not_found_on_delete`
/// never reaches here — `delete` handlers treat it as success already.
fn handle_operation_error(op: &SyncOperation, error: ExecutorError, result: &mut SyncResult) {
    match error {
        ExecutorError::WebDav(err) => {
            let kind = err.kind();
            if matches!(kind, ErrorKind::Permission | ErrorKind::StorageQuota) {
                result.conflicts.push(Conflict {
                    path: op.target_path.clone(),
                    kind: if kind == ErrorKind::Permission {
                        ConflictKind::PermissionDenied
                    } else {
                        ConflictKind::StorageError
                    },
                    local_meta: None,
                    remote_meta: None,
                    description: err.to_string(),
                    timestamp: journal_now(),
                    resolution: Some(ConflictResolution {
                        action: ResolutionAction::Skip,
                        path: op.target_path.clone(),
                        reason: "errors of this kind always skip".to_string(),
                        timestamp: journal_now(),
                    }),
                });
                result.record_skip(op.target_path.clone(), err.to_string());
            } else {
                result.record_error(format_op_error(&op.target_path, op_verb(op), kind));
            }
        }
        ExecutorError::Io(err) => {
            result.record_error(format_op_error(&op.target_path, op_verb(op), ErrorKind::IoLocal));
            result.warnings.push(format!("{}: {err}", op.target_path));
        }
    }
}

fn op_verb(op: &SyncOperation) -> &'static str {
    match op.op_type {
        OperationType::CreateOrUpdate => match op.direction {
            Direction::LocalToRemote => "PUT",
            Direction::RemoteToLocal => "GET",
            Direction::Bidirectional | Direction::None => "SYNC",
        },
        OperationType::Delete => "DELETE",
        OperationType::Move => "MOVE",
        OperationType::MakeDirectory => "MKCOL",
    }
}

#[derive(Debug)]
enum ExecutorError {
    WebDav(WebDavError),
    Io(std::io::Error),
}

impl From<WebDavError> for ExecutorError {
    fn from(value: WebDavError) -> Self {
        ExecutorError::WebDav(value)
    }
}

impl From<std::io::Error> for ExecutorError {
    fn from(value: std::io::Error) -> Self {
        ExecutorError::Io(value)
    }
}

impl ExecutorError {
    fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::WebDav(err) => err.kind(),
            ExecutorError::Io(_) => ErrorKind::IoLocal,
        }
    }
}

async fn execute_one<T: WebDavTransport>(
    op: &SyncOperation,
    local_root: &Path,
    webdav_root: &str,
    transport: &T,
    journal: &ResumeJournal,
    config: &SyncConfig,
    cancel: &CancellationToken,
    result: &mut SyncResult,
) -> Result<(), ExecutorError> {
    match op.op_type {
        OperationType::MakeDirectory => {
            transport.make_directory(&remote_path(webdav_root, &op.target_path), cancel).await?;
            Ok(())
        }
        OperationType::CreateOrUpdate => {
            let direction = match op.direction {
                Direction::Bidirectional => {
                    resolve_bidirectional(&op.target_path, local_root, webdav_root, transport, config, cancel).await?
                }
                other => other,
            };
            match direction {
                Direction::LocalToRemote => {
                    upload(op, local_root, webdav_root, transport, journal, config, cancel).await?;
                }
                Direction::RemoteToLocal => {
                    download(op, local_root, webdav_root, transport, journal, config, cancel).await?;
                }
                Direction::Bidirectional | Direction::None => {}
            }
            record_transfer(op, result);
            Ok(())
        }
        OperationType::Delete => {
            match op.direction {
                Direction::LocalToRemote => delete_local(&local_path(local_root, &op.target_path)).await?,
                _ => {
                    transport.delete(&remote_path(webdav_root, &op.target_path), cancel).await?;
                }
            }
            result.deleted_files.push(op.target_path.clone());
            result.processed_files += 1;
            Ok(())
        }
        OperationType::Move => {
            match op.direction {
                Direction::LocalToRemote => {
                    let target = local_path(local_root, &op.target_path);
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::rename(local_path(local_root, &op.source_path), target).await?;
                }
                _ => {
                    let to = remote_path(webdav_root, &op.target_path);
                    if let Some(parent) = parent_of(&op.target_path) {
                        transport.make_directory(&remote_path(webdav_root, parent), cancel).await?;
                    }
                    transport.mv(&remote_path(webdav_root, &op.source_path), &to, cancel).await?;
                }
            }
            result.updated_files.push(op.target_path.clone());
            result.processed_files += 1;
            Ok(())
        }
    }
}

fn record_transfer(op: &SyncOperation, result: &mut SyncResult) {
    use ncsync_core::ChangeType;
    match op.change_type {
        ChangeType::Create => result.created_files.push(op.target_path.clone()),
        _ => result.updated_files.push(op.target_path.clone()),
    }
    result.processed_files += 1;
    result.transferred_size += op.size;
}

fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

fn remote_path(webdav_root: &str, rel: &str) -> String {
    if rel.is_empty() {
        webdav_root.to_string()
    } else {
        format!("{}/{}", webdav_root.trim_end_matches('/'), rel)
    }
}

fn local_path(local_root: &Path, rel: &str) -> PathBuf {
    local_root.join(rel)
}

async fn delete_local(path: &Path) -> std::io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

/// Picks a concrete direction for a `Bidirectional` op (diff rule 8: equal
/// timestamps, differing content) by re-reading both sides' modification
/// times at execution time; on a tie, local wins (spec.md §4.F:
/// "source-wins fallback" — local is the side this workspace treats as the
/// canonical source, documented in DESIGN.md).
async fn resolve_bidirectional<T: WebDavTransport>(
    rel_path: &str,
    local_root: &Path,
    webdav_root: &str,
    transport: &T,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<Direction, ExecutorError> {
    let local_modified = match tokio::fs::metadata(local_path(local_root, rel_path)).await {
        Ok(meta) => meta.modified().ok().map(Timestamp::from_system_time),
        Err(_) => None,
    };
    let remote_modified = transport
        .get_properties(&remote_path(webdav_root, rel_path), cancel)
        .await?
        .and_then(|entry| entry.modified);

    match (local_modified, remote_modified) {
        (Some(local), Some(remote)) if remote.is_strictly_newer_than(local, config.mod_time_tolerance) => {
            Ok(Direction::RemoteToLocal)
        }
        _ => Ok(Direction::LocalToRemote),
    }
}

async fn upload<T: WebDavTransport>(
    op: &SyncOperation,
    local_root: &Path,
    webdav_root: &str,
    transport: &T,
    journal: &ResumeJournal,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<(), ExecutorError> {
    let remote = remote_path(webdav_root, &op.target_path);
    if let Some(parent) = parent_of(&op.target_path) {
        transport.make_directory(&remote_path(webdav_root, parent), cancel).await?;
    }

    let path = local_path(local_root, &op.target_path);
    let meta = tokio::fs::metadata(&path).await?;
    let modified = meta.modified().ok().map(Timestamp::from_system_time).unwrap_or(Timestamp::UNIX_EPOCH);
    let size = meta.len();

    let mut file = tokio::fs::File::open(&path).await?;

    if size <= config.large_file_threshold {
        transport.upload(&remote, &mut file, size, cancel).await?;
        return Ok(());
    }

    let now = journal_now();
    let resume_offset = journal
        .get(&op.target_path, TransferOperation::Upload, size, modified, now)
        .map_err(journal_io_error)?
        .map(|state| state.transferred_size)
        .unwrap_or(0);
    journal
        .start(&op.target_path, TransferOperation::Upload, size, modified, now)
        .map_err(journal_io_error)?;

    // Hashing the reader rather than the raw file means a resumed upload's
    // discarded prefix (spec.md §4.C: "seeks, or reads-and-discards") still
    // contributes to the digest, so the checksum covers the whole file even
    // when the transfer itself only reissues the remaining chunks.
    let mut file = HashingReader::new(file);
    let digest = file.digest();

    let journal_path = op.target_path.clone();
    let mut on_chunk = |transferred: u64| {
        let checksum = if transferred >= size { Some(digest.hex()) } else { None };
        let _ = journal.update(&journal_path, transferred, checksum, journal_now());
    };

    let upload_result = transport
        .upload_chunked(&remote, &mut file, size, config.chunk_size, resume_offset, &mut on_chunk, cancel)
        .await;

    match upload_result {
        Ok(()) => {
            journal.complete(&op.target_path).map_err(journal_io_error)?;
            Ok(())
        }
        Err(error) => Err(ExecutorError::WebDav(error)),
    }
}

/// Downloads `op.target_path` from the remote side, resuming from the
/// resume journal for files over `config.large_file_threshold` the same way
/// `upload` does (spec.md §1, §4.D: "used to resume partial uploads and
/// downloads"). Small files skip the journal entirely and are always
/// written from scratch.
async fn download<T: WebDavTransport>(
    op: &SyncOperation,
    local_root: &Path,
    webdav_root: &str,
    transport: &T,
    journal: &ResumeJournal,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<(), ExecutorError> {
    let path = local_path(local_root, &op.target_path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let remote = remote_path(webdav_root, &op.target_path);

    if op.size <= config.large_file_threshold {
        let mut file = tokio::fs::File::create(&path).await?;
        let mut no_op = |_: u64| {};
        transport.download(&remote, &mut file, 0, &mut no_op, cancel).await?;
        file.flush().await?;
        return Ok(());
    }

    let modified = transport
        .get_properties(&remote, cancel)
        .await?
        .and_then(|entry| entry.modified)
        .unwrap_or(Timestamp::UNIX_EPOCH);

    let now = journal_now();
    let resume_offset = journal
        .get(&op.target_path, TransferOperation::Download, op.size, modified, now)
        .map_err(journal_io_error)?
        .map(|state| state.transferred_size)
        .filter(|offset| local_file_len(&path).unwrap_or(0) == *offset)
        .unwrap_or(0);
    journal
        .start(&op.target_path, TransferOperation::Download, op.size, modified, now)
        .map_err(journal_io_error)?;

    let file = if resume_offset > 0 {
        tokio::fs::OpenOptions::new().append(true).open(&path).await?
    } else {
        tokio::fs::File::create(&path).await?
    };

    // Unlike `upload`'s reader, an append-mode resume only sees the bytes
    // written *this run* — the digest therefore covers the freshly written
    // tail, not the whole file, for a resumed transfer.
    let mut file = HashingWriter::new(file);
    let digest = file.digest();

    let journal_path = op.target_path.clone();
    let mut on_chunk = |transferred: u64| {
        let checksum = if transferred >= op.size { Some(digest.hex()) } else { None };
        let _ = journal.update(&journal_path, transferred, checksum, journal_now());
    };

    let download_result = transport.download(&remote, &mut file, resume_offset, &mut on_chunk, cancel).await;

    match download_result {
        Ok(_) => {
            file.flush().await?;
            journal.complete(&op.target_path).map_err(journal_io_error)?;
            Ok(())
        }
        Err(error) => Err(ExecutorError::WebDav(error)),
    }
}

/// A resumed download only trusts the journal's recorded offset when the
/// partial file on disk is actually that long; otherwise something
/// (deletion, truncation) invalidated the partial write and we restart at 0.
fn local_file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|meta| meta.len())
}

fn journal_io_error(error: ncsync_journal::JournalError) -> ExecutorError {
    ExecutorError::Io(std::io::Error::other(error.to_string()))
}
