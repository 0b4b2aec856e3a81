use serde::{Deserialize, Serialize};

/// The shared error-kind taxonomy of spec.md §7, used across crates so the
/// planner and executor can match on `kind` rather than downcast an opaque
/// error. `ncsync-webdav` has its own richer `WebDavError` (carrying status,
/// path, method); this enum is the least-common-denominator view of it that
/// the rest of the workspace consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Auth,
    Permission,
    NotFoundOnDelete,
    NotFoundFatal,
    TemporaryNetwork,
    StorageQuota,
    IoLocal,
    Parse,
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TemporaryNetwork)
    }

    pub fn is_run_fatal(self) -> bool {
        matches!(self, ErrorKind::Auth | ErrorKind::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Permission => "permission",
            ErrorKind::NotFoundOnDelete => "not_found_on_delete",
            ErrorKind::NotFoundFatal => "not_found_fatal",
            ErrorKind::TemporaryNetwork => "temporary_network",
            ErrorKind::StorageQuota => "storage_quota",
            ErrorKind::IoLocal => "io_local",
            ErrorKind::Parse => "parse",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders a user-visible failure string with the path, verb, and kind —
/// never a credential or a full query string (spec.md §7).
pub fn format_op_error(path: &str, verb: &str, kind: ErrorKind) -> String {
    format!("{path} {verb} {kind}")
}
