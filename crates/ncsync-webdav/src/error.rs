use std::time::Duration;

use ncsync_core::ErrorKind;
use reqwest::StatusCode;

/// The WebDAV transport's own error sum type (spec.md §4.C, §7, §9):
/// every variant carries the verb and path so the executor can format a
/// user-visible message without a credential or full query string ever
/// reaching it.
#[derive(Debug, thiserror::Error)]
pub enum WebDavError {
    #[error("{method} {path}: authentication failed (401)")]
    Auth { method: &'static str, path: String },

    #[error("{method} {path}: permission denied (403)")]
    Permission { method: &'static str, path: String },

    #[error("{method} {path}: not found (404)")]
    NotFound { method: &'static str, path: String },

    #[error("{method} {path}: conflict (409)")]
    Conflict { method: &'static str, path: String },

    #[error("{method} {path}: locked (423)")]
    Locked { method: &'static str, path: String },

    #[error("{method} {path}: storage quota exceeded (507)")]
    Storage { method: &'static str, path: String },

    #[error("{method} {path}: temporary failure ({status})")]
    Temporary {
        method: &'static str,
        path: String,
        status: StatusCode,
        retry_after: Option<Duration>,
    },

    #[error("{method} {path}: HTTP {status}: {message}")]
    Other {
        method: &'static str,
        path: String,
        status: StatusCode,
        message: String,
    },

    #[error("{method} {path}: transport error: {source}")]
    Transport {
        method: &'static str,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed multistatus response: {0}")]
    Parse(#[from] roxmltree::Error),

    #[error("{method} {path}: local I/O error: {source}")]
    Io {
        method: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{method} {path}: cancelled")]
    Cancelled { method: &'static str, path: String },
}

impl WebDavError {
    /// Converts a response status into the taxonomy of spec.md §4.C, given
    /// the verb that was being retried (DELETE's 404 is success, not this
    /// path — callers special-case that before reaching here).
    pub fn from_status(method: &'static str, path: impl Into<String>, status: StatusCode, message: String) -> Self {
        let path = path.into();
        match status {
            StatusCode::UNAUTHORIZED => WebDavError::Auth { method, path },
            StatusCode::FORBIDDEN => WebDavError::Permission { method, path },
            StatusCode::NOT_FOUND => WebDavError::NotFound { method, path },
            StatusCode::CONFLICT => WebDavError::Conflict { method, path },
            StatusCode::LOCKED => WebDavError::Locked { method, path },
            StatusCode::INSUFFICIENT_STORAGE => WebDavError::Storage { method, path },
            s if is_temporary_status(s) => WebDavError::Temporary {
                method,
                path,
                status: s,
                retry_after: None,
            },
            s => WebDavError::Other {
                method,
                path,
                status: s,
                message,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WebDavError::Auth { .. } => ErrorKind::Auth,
            WebDavError::Permission { .. } => ErrorKind::Permission,
            WebDavError::NotFound { .. } => ErrorKind::NotFoundFatal,
            WebDavError::Conflict { .. } => ErrorKind::NotFoundFatal,
            WebDavError::Locked { .. } | WebDavError::Temporary { .. } => ErrorKind::TemporaryNetwork,
            WebDavError::Storage { .. } => ErrorKind::StorageQuota,
            WebDavError::Other { .. } => ErrorKind::NotFoundFatal,
            WebDavError::Transport { source, .. } if is_temporary_transport_message(&source.to_string()) => {
                ErrorKind::TemporaryNetwork
            }
            WebDavError::Transport { .. } => ErrorKind::IoLocal,
            WebDavError::Parse(_) => ErrorKind::Parse,
            WebDavError::Io { .. } => ErrorKind::IoLocal,
            WebDavError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// `IsTemporary` (spec.md §4.C retry policy).
    pub fn is_temporary(&self) -> bool {
        match self {
            WebDavError::Locked { .. } => true,
            WebDavError::Temporary { .. } => true,
            WebDavError::Transport { source, .. } => is_temporary_transport_message(&source.to_string()),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            WebDavError::Temporary { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            WebDavError::Auth { path, .. }
            | WebDavError::Permission { path, .. }
            | WebDavError::NotFound { path, .. }
            | WebDavError::Conflict { path, .. }
            | WebDavError::Locked { path, .. }
            | WebDavError::Storage { path, .. }
            | WebDavError::Temporary { path, .. }
            | WebDavError::Other { path, .. }
            | WebDavError::Transport { path, .. }
            | WebDavError::Io { path, .. }
            | WebDavError::Cancelled { path, .. } => path,
            WebDavError::Parse(_) => "",
        }
    }
}

/// WebDAV statuses that §4.C classifies as temporary: 408, 429, 500, 502,
/// 503, 504 (501 Not Implemented is excluded on purpose).
pub fn is_temporary_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Substrings that mark a transport-level error (no HTTP status at all) as
/// temporary, per spec.md §4.C.
const TEMPORARY_MESSAGE_SUBSTRINGS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timeout",
    "network is unreachable",
    "temporary failure",
    "service unavailable",
    "deadline exceeded",
];

pub fn is_temporary_transport_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TEMPORARY_MESSAGE_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}
