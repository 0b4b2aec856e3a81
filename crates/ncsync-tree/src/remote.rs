use ncsync_core::{FileMetadata, Timestamp};
use ncsync_match::Matcher;
use ncsync_url::join_path;
use ncsync_webdav::{WebDavError, WebDavTransport};
use tokio_util::sync::CancellationToken;

use crate::tree::FileTree;

/// Snapshots the remote side by recursive `PROPFIND Depth: 1`, starting at
/// `webdav_root` (spec.md §4.E). Each directory is listed once; its children
/// are re-checked against `matcher` before being kept, and directories are
/// recursed into depth-first so a child directory's own node is always
/// inserted before its grandchildren are discovered.
pub async fn build_remote_tree<T: WebDavTransport>(
    transport: &T,
    webdav_root: &str,
    matcher: &Matcher,
    cancel: &CancellationToken,
) -> Result<FileTree, WebDavError> {
    let mut tree = FileTree::new();
    let mut stack = vec![(String::new(), webdav_root.trim_end_matches('/').to_string())];

    while let Some((rel_prefix, abs_path)) = stack.pop() {
        if cancel.is_cancelled() {
            return Err(WebDavError::Cancelled {
                method: "PROPFIND",
                path: abs_path,
            });
        }

        let children = transport.list_directory(&abs_path, cancel).await?;
        for child in children {
            let rel_path = join_path(&rel_prefix, &child.name);
            if matcher.is_excluded(&rel_path, child.is_directory) {
                continue;
            }

            let metadata = FileMetadata {
                path: rel_path.clone(),
                name: child.name.clone(),
                size: child.size,
                modified: child.modified.unwrap_or(Timestamp::UNIX_EPOCH),
                etag: child.etag.clone(),
                is_directory: child.is_directory,
            };
            tree.insert(metadata, Some(rel_prefix.clone()));

            if child.is_directory {
                let child_abs = format!("{}/{}", abs_path.trim_end_matches('/'), child.name);
                stack.push((rel_path, child_abs));
            }
        }
    }

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::State;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::any;
    use axum::Router;
    use ncsync_match::Matcher;
    use ncsync_webdav::{BasicAuthProvider, HttpWebDavClient, RetryConfig};
    use tokio::net::TcpListener;
    use url::Url;

    use super::*;

    const PROPFIND_ROOT: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/docs/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/root.txt</d:href>
    <d:propstat><d:prop><d:getcontentlength>3</d:getcontentlength></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
</d:multistatus>"#;

    const PROPFIND_DOCS: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/docs/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/docs/a.txt</d:href>
    <d:propstat><d:prop><d:getcontentlength>5</d:getcontentlength></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
</d:multistatus>"#;

    async fn handler(State(_): State<()>, req: Request<Body>) -> impl IntoResponse {
        let path = req.uri().path().to_string();
        let body = if path == "/dav/docs" || path == "/dav/docs/" {
            PROPFIND_DOCS
        } else {
            PROPFIND_ROOT
        };
        (StatusCode::MULTI_STATUS, [("content-type", "application/xml")], body.to_string())
    }

    #[tokio::test]
    async fn recurses_into_subdirectories() {
        let app = Router::new().route("/{*path}", any(handler)).with_state(());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let base = Url::parse(&format!("http://{addr}/")).unwrap();

        let client = HttpWebDavClient::new(
            base,
            BasicAuthProvider::new("alice", "secret"),
            Duration::from_secs(5),
            RetryConfig::default(),
        )
        .unwrap();

        let matcher = Matcher::compile(&[]).unwrap();
        let cancel = CancellationToken::new();
        let tree = build_remote_tree(&client, "/dav", &matcher, &cancel).await.unwrap();

        assert!(tree.contains("docs"));
        assert!(tree.contains("docs/a.txt"));
        assert!(tree.contains("root.txt"));
        assert_eq!(tree.get("docs/a.txt").unwrap().size, 5);
    }
}
