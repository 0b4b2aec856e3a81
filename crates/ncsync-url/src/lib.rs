//! Parses a remote "files" URL into its WebDAV coordinates and provides
//! forward-slash path arithmetic shared by the local and remote tree
//! builders (spec.md §4.B).

use anyhow::{bail, Context, Result};
use percent_encoding::percent_decode_str;
use url::Url;

/// The parsed coordinates of a remote target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLocation {
    /// `scheme://host[:port]`, no path.
    pub base_url: String,
    pub user_id: String,
    /// Forward-slash normalized, always starts with `/`; `"/"` is the root.
    pub directory: String,
    /// `/remote.php/dav/files/USER_ID/DIRECTORY`, the WebDAV collection to
    /// operate against.
    pub webdav_path: String,
}

const FILES_TEMPLATE_PREFIX: &str = "/apps/files/files/";
const DAV_PREFIX: &str = "/remote.php/dav/files/";

/// A string is a remote location, not a local filesystem path, iff it
/// contains `"://"` (spec.md §4.B).
pub fn is_remote(s: &str) -> bool {
    s.contains("://")
}

pub fn parse_remote_url(raw: &str) -> Result<RemoteLocation> {
    let url = Url::parse(raw).with_context(|| format!("not a valid URL: {raw}"))?;

    if url.scheme() != "https" {
        bail!("remote URL must use https: {raw}");
    }
    let host = url.host_str().filter(|h| !h.is_empty());
    let Some(host) = host else {
        bail!("remote URL is missing a host: {raw}");
    };

    let base_url = match url.port() {
        Some(port) => format!("https://{host}:{port}"),
        None => format!("https://{host}"),
    };

    let path = url.path();

    if let Some(rest) = path.strip_prefix(DAV_PREFIX) {
        // Already canonicalized: `/remote.php/dav/files/USER_ID[/DIR...]`.
        let rest = rest.trim_start_matches('/');
        let mut segments = rest.splitn(2, '/');
        let user_id = segments.next().filter(|s| !s.is_empty());
        let Some(user_id) = user_id else {
            bail!("remote URL is missing a user id: {raw}");
        };
        let directory = normalize_directory(segments.next().unwrap_or(""));
        let webdav_path = build_webdav_path(user_id, &directory);
        return Ok(RemoteLocation {
            base_url,
            user_id: user_id.to_string(),
            directory,
            webdav_path,
        });
    }

    let Some(user_id) = path.strip_prefix(FILES_TEMPLATE_PREFIX) else {
        bail!("remote URL does not match the expected /apps/files/files/USER_ID template: {raw}");
    };
    let user_id = user_id.trim_end_matches('/');
    if user_id.is_empty() || user_id.contains('/') {
        bail!("remote URL is missing a user id: {raw}");
    }

    let directory = match url.query_pairs().find(|(k, _)| k == "dir") {
        Some((_, v)) => {
            let decoded = percent_decode_str(&v)
                .decode_utf8()
                .with_context(|| format!("dir query parameter is not valid UTF-8: {raw}"))?;
            normalize_directory(&decoded)
        }
        // No `dir` parameter falls back to the root (spec.md §9 open question,
        // resolved in DESIGN.md).
        None => "/".to_string(),
    };

    let webdav_path = build_webdav_path(user_id, &directory);

    Ok(RemoteLocation {
        base_url,
        user_id: user_id.to_string(),
        directory,
        webdav_path,
    })
}

fn normalize_directory(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn build_webdav_path(user_id: &str, directory: &str) -> String {
    if directory == "/" {
        format!("{DAV_PREFIX}{user_id}")
    } else {
        format!("{DAV_PREFIX}{user_id}{directory}")
    }
}

/// Joins two forward-slash path segments, collapsing redundant slashes.
/// Used for both local (already forward-slash normalized by the caller) and
/// remote path arithmetic, regardless of host OS.
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, true) => String::new(),
        (true, false) => child.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}/{child}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_files_url_with_dir() {
        let loc = parse_remote_url("https://cloud.example.com/apps/files/files/alice?dir=/Documents/Work")
            .unwrap();
        assert_eq!(loc.base_url, "https://cloud.example.com");
        assert_eq!(loc.user_id, "alice");
        assert_eq!(loc.directory, "/Documents/Work");
        assert_eq!(loc.webdav_path, "/remote.php/dav/files/alice/Documents/Work");
    }

    #[test]
    fn missing_dir_falls_back_to_root() {
        let loc = parse_remote_url("https://cloud.example.com/apps/files/files/alice").unwrap();
        assert_eq!(loc.directory, "/");
        assert_eq!(loc.webdav_path, "/remote.php/dav/files/alice");
    }

    #[test]
    fn percent_encoded_dir_is_decoded() {
        let loc = parse_remote_url(
            "https://cloud.example.com/apps/files/files/alice?dir=%2FShared%20Docs",
        )
        .unwrap();
        assert_eq!(loc.directory, "/Shared Docs");
    }

    #[test]
    fn passes_through_precanonicalized_dav_url() {
        let loc = parse_remote_url("https://cloud.example.com/remote.php/dav/files/alice/Photos")
            .unwrap();
        assert_eq!(loc.user_id, "alice");
        assert_eq!(loc.directory, "/Photos");
        assert_eq!(loc.webdav_path, "/remote.php/dav/files/alice/Photos");
    }

    #[test]
    fn rejects_non_https() {
        assert!(parse_remote_url("http://cloud.example.com/apps/files/files/alice").is_err());
    }

    #[test]
    fn rejects_wrong_path_template() {
        assert!(parse_remote_url("https://cloud.example.com/some/other/path").is_err());
    }

    #[test]
    fn is_remote_detects_scheme_separator() {
        assert!(is_remote("https://cloud.example.com/apps/files/files/alice"));
        assert!(!is_remote("/home/alice/Documents"));
        assert!(!is_remote("C:\\Users\\alice\\Documents"));
    }

    #[test]
    fn join_path_collapses_slashes() {
        assert_eq!(join_path("/Documents/", "/Work/a.txt"), "/Documents/Work/a.txt");
        assert_eq!(join_path("/", "a.txt"), "a.txt");
        assert_eq!(join_path("", ""), "");
    }
}
