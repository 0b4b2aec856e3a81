use std::future::Future;
use std::time::Duration;

use futures_util::TryStreamExt as _;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{redact_url, AuthProvider};
use crate::error::WebDavError;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::xml::{parse_multistatus, RemoteEntry, PROPFIND_BODY};

const USER_AGENT: &str = concat!("ncsync/", env!("CARGO_PKG_VERSION"));

/// A capability seam (spec.md §9) over the WebDAV verbs the engine needs,
/// so the tree builder and executor can be unit-tested against an
/// in-memory fake rather than a live server.
pub trait WebDavTransport: Send + Sync {
    fn list_directory(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<RemoteEntry>, WebDavError>> + Send;

    fn get_properties(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<RemoteEntry>, WebDavError>> + Send;

    fn make_directory(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), WebDavError>> + Send;

    fn delete(&self, path: &str, cancel: &CancellationToken) -> impl Future<Output = Result<bool, WebDavError>> + Send;

    fn mv(
        &self,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), WebDavError>> + Send;

    fn copy(
        &self,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), WebDavError>> + Send;

    /// Streams the body to `writer`, resuming at `resume_offset` (0 for a
    /// fresh download) via a `Range` request. Returns the total number of
    /// bytes written (including any already on disk before this call).
    /// `on_chunk` is called with the cumulative byte count after each chunk
    /// so a caller can update the resume journal.
    fn download(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
        resume_offset: u64,
        on_chunk: &mut (dyn FnMut(u64) + Send),
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<u64, WebDavError>> + Send;

    fn upload(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), WebDavError>> + Send;

    /// Uploads in `chunk_size`-sized `Content-Range` PUTs, starting at
    /// `resume_offset` (0 for a fresh upload). `on_chunk` is called with the
    /// cumulative transferred byte count after each successful chunk so a
    /// caller can update the resume journal and a progress tracker.
    fn upload_chunked(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
        chunk_size: u64,
        resume_offset: u64,
        on_chunk: &mut (dyn FnMut(u64) + Send),
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), WebDavError>> + Send;
}

/// The production `reqwest`-backed implementation (grounded on
/// `bastion-targets/src/webdav_client.rs`).
#[derive(Clone)]
pub struct HttpWebDavClient<A: AuthProvider> {
    http: reqwest::Client,
    base_url: Url,
    auth: A,
    retry: RetryConfig,
}

impl<A: AuthProvider> HttpWebDavClient<A> {
    pub fn new(base_url: Url, auth: A, timeout: Duration, retry: RetryConfig) -> Result<Self, WebDavError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|source| WebDavError::Transport {
                method: "BUILD",
                path: String::new(),
                source,
            })?;
        Ok(HttpWebDavClient {
            http,
            base_url,
            auth,
            retry,
        })
    }

    /// Connection pool teardown is implicit in `reqwest::Client`'s `Drop`;
    /// this exists so callers have an explicit lifecycle hook per spec.md §5.
    pub fn close(self) {
        drop(self);
    }

    fn resolve(&self, path: &str) -> Result<Url, WebDavError> {
        self.base_url.join(path.trim_start_matches('/')).map_err(|_| WebDavError::Other {
            method: "RESOLVE",
            path: path.to_string(),
            status: StatusCode::BAD_REQUEST,
            message: "invalid path".to_string(),
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(self.auth.username(), Some(self.auth.app_password()))
    }

    async fn propfind(&self, path: &str, depth: &'static str, cancel: &CancellationToken) -> Result<String, WebDavError> {
        let url = self.resolve(path)?;
        retry_with_backoff(self.retry, cancel, |_attempt| {
            let url = url.clone();
            async move {
                tracing::debug!(url = %redact_url(&url), depth, "webdav propfind");
                let depth_name = reqwest::header::HeaderName::from_static("depth");
                let req = self
                    .http
                    .request(Method::from_bytes(b"PROPFIND").unwrap(), url.clone())
                    .header(depth_name, depth)
                    .header(CONTENT_TYPE, "application/xml")
                    .body(PROPFIND_BODY);
                let res = self.authed(req).send().await.map_err(|source| WebDavError::Transport {
                    method: "PROPFIND",
                    path: path.to_string(),
                    source,
                })?;
                let status = res.status();
                if status == StatusCode::MULTI_STATUS || status == StatusCode::OK {
                    res.text().await.map_err(|source| WebDavError::Transport {
                        method: "PROPFIND",
                        path: path.to_string(),
                        source,
                    })
                } else {
                    let retry_after = parse_retry_after(&res);
                    let message = res.text().await.unwrap_or_default();
                    Err(with_retry_after(
                        WebDavError::from_status("PROPFIND", path, status, message),
                        retry_after,
                    ))
                }
            }
        })
        .await
    }
}

impl<A: AuthProvider> WebDavTransport for HttpWebDavClient<A> {
    async fn list_directory(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<RemoteEntry>, WebDavError> {
        let xml = self.propfind(path, "1", cancel).await?;
        let mut entries = parse_multistatus(&xml)?;
        let self_href = self.resolve(path)?.path().trim_end_matches('/').to_string();
        entries.retain(|e| e.href.trim_end_matches('/') != self_href);
        Ok(entries)
    }

    async fn get_properties(&self, path: &str, cancel: &CancellationToken) -> Result<Option<RemoteEntry>, WebDavError> {
        match self.propfind(path, "0", cancel).await {
            Ok(xml) => {
                let entries = parse_multistatus(&xml)?;
                Ok(entries.into_iter().next())
            }
            Err(WebDavError::NotFound { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn make_directory(&self, path: &str, cancel: &CancellationToken) -> Result<(), WebDavError> {
        // MKCOL doesn't create intermediate collections; many servers return
        // 409 Conflict when a parent is missing. Walk up, collect the
        // missing chain, then create it root-to-leaf (grounded on
        // `webdav_client.rs::ensure_collection`, bounded at 32 levels).
        let mut pending = Vec::new();
        let mut current = path.trim_end_matches('/').to_string();

        for _ in 0..=32 {
            match self.mkcol_once(&current, cancel).await? {
                MkcolOutcome::Created | MkcolOutcome::AlreadyExists => {
                    while let Some(next) = pending.pop() {
                        match self.mkcol_once(&next, cancel).await? {
                            MkcolOutcome::Created | MkcolOutcome::AlreadyExists => {}
                            MkcolOutcome::MissingParent => {
                                return Err(WebDavError::Other {
                                    method: "MKCOL",
                                    path: next,
                                    status: StatusCode::CONFLICT,
                                    message: "parent still missing after recursive creation".to_string(),
                                });
                            }
                        }
                    }
                    return Ok(());
                }
                MkcolOutcome::MissingParent => {
                    let parent = parent_of(&current);
                    if parent == current || parent.is_empty() {
                        return Err(WebDavError::Other {
                            method: "MKCOL",
                            path: current,
                            status: StatusCode::CONFLICT,
                            message: "no parent collection to create".to_string(),
                        });
                    }
                    pending.push(current);
                    current = parent;
                }
            }
        }

        Err(WebDavError::Other {
            method: "MKCOL",
            path: path.to_string(),
            status: StatusCode::CONFLICT,
            message: "recursion limit exceeded while ensuring parent collections".to_string(),
        })
    }

    async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<bool, WebDavError> {
        let url = self.resolve(path)?;
        retry_with_backoff(self.retry, cancel, |_attempt| {
            let url = url.clone();
            async move {
                tracing::debug!(url = %redact_url(&url), "webdav delete");
                let res = self
                    .authed(self.http.delete(url.clone()))
                    .send()
                    .await
                    .map_err(|source| WebDavError::Transport {
                        method: "DELETE",
                        path: path.to_string(),
                        source,
                    })?;
                match res.status() {
                    // Idempotent: already gone is success (spec.md §7).
                    StatusCode::NOT_FOUND => Ok(false),
                    s if s.is_success() => Ok(true),
                    s => {
                        let retry_after = parse_retry_after(&res);
                        let message = res.text().await.unwrap_or_default();
                        Err(with_retry_after(WebDavError::from_status("DELETE", path, s, message), retry_after))
                    }
                }
            }
        })
        .await
    }

    async fn mv(&self, from: &str, to: &str, cancel: &CancellationToken) -> Result<(), WebDavError> {
        self.move_or_copy(Method::from_bytes(b"MOVE").unwrap(), "MOVE", from, to, cancel).await
    }

    async fn copy(&self, from: &str, to: &str, cancel: &CancellationToken) -> Result<(), WebDavError> {
        self.move_or_copy(Method::from_bytes(b"COPY").unwrap(), "COPY", from, to, cancel).await
    }

    async fn download(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
        resume_offset: u64,
        on_chunk: &mut (dyn FnMut(u64) + Send),
        cancel: &CancellationToken,
    ) -> Result<u64, WebDavError> {
        let url = self.resolve(path)?;
        if cancel.is_cancelled() {
            return Err(WebDavError::Cancelled { method: "GET", path: path.to_string() });
        }
        tracing::debug!(url = %redact_url(&url), resume_offset, "webdav get");
        let mut req = self.authed(self.http.get(url.clone()));
        if resume_offset > 0 {
            req = req.header(reqwest::header::RANGE, format!("bytes={resume_offset}-"));
        }
        let res = req.send().await.map_err(|source| WebDavError::Transport {
            method: "GET",
            path: path.to_string(),
            source,
        })?;
        let status = res.status();
        let resumed = status == StatusCode::PARTIAL_CONTENT;
        if status != StatusCode::OK && !resumed {
            let message = res.text().await.unwrap_or_default();
            return Err(WebDavError::from_status("GET", path, status, message));
        }
        if resume_offset > 0 && !resumed {
            // Server ignored `Range` and sent the whole body back; the
            // caller's partial file no longer lines up with what's coming.
            return Err(WebDavError::Other {
                method: "GET",
                path: path.to_string(),
                status,
                message: "server does not support resumed GET (Range header ignored)".to_string(),
            });
        }

        let mut stream = res.bytes_stream();
        let mut written = resume_offset;
        while let Some(chunk) = stream.try_next().await.map_err(|source| WebDavError::Transport {
            method: "GET",
            path: path.to_string(),
            source,
        })? {
            if cancel.is_cancelled() {
                return Err(WebDavError::Cancelled { method: "GET", path: path.to_string() });
            }
            writer.write_all(&chunk).await.map_err(|source| WebDavError::Io {
                method: "GET",
                path: path.to_string(),
                source,
            })?;
            written += chunk.len() as u64;
            on_chunk(written);
        }
        writer.flush().await.map_err(|source| WebDavError::Io {
            method: "GET",
            path: path.to_string(),
            source,
        })?;
        Ok(written)
    }

    async fn upload(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<(), WebDavError> {
        let mut buf = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut buf).await.map_err(|source| WebDavError::Io {
            method: "PUT",
            path: path.to_string(),
            source,
        })?;
        let url = self.resolve(path)?;
        retry_with_backoff(self.retry, cancel, |_attempt| {
            let url = url.clone();
            let body = buf.clone();
            async move {
                if cancel.is_cancelled() {
                    return Err(WebDavError::Cancelled { method: "PUT", path: path.to_string() });
                }
                tracing::debug!(url = %redact_url(&url), size, "webdav put");
                let res = self
                    .authed(self.http.put(url.clone()))
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .header(CONTENT_LENGTH, size)
                    .body(body)
                    .send()
                    .await
                    .map_err(|source| WebDavError::Transport {
                        method: "PUT",
                        path: path.to_string(),
                        source,
                    })?;
                match res.status() {
                    StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
                    s => {
                        let retry_after = parse_retry_after(&res);
                        let message = res.text().await.unwrap_or_default();
                        Err(with_retry_after(WebDavError::from_status("PUT", path, s, message), retry_after))
                    }
                }
            }
        })
        .await
    }

    async fn upload_chunked(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
        chunk_size: u64,
        resume_offset: u64,
        on_chunk: &mut (dyn FnMut(u64) + Send),
        cancel: &CancellationToken,
    ) -> Result<(), WebDavError> {
        let url = self.resolve(path)?;
        let chunk_size = chunk_size.max(1) as usize;

        // `ResumeChunkedUpload` seeks, or reads-and-discards if the source
        // is not seekable, to `offset` before the loop (spec.md §4.C).
        if resume_offset > 0 {
            discard(reader, resume_offset).await.map_err(|source| WebDavError::Io {
                method: "PUT",
                path: path.to_string(),
                source,
            })?;
        }

        let mut offset = resume_offset;
        let mut buf = vec![0u8; chunk_size];

        while offset < size {
            if cancel.is_cancelled() {
                return Err(WebDavError::Cancelled { method: "PUT", path: path.to_string() });
            }

            let n = read_fill(reader, &mut buf).await.map_err(|source| WebDavError::Io {
                method: "PUT",
                path: path.to_string(),
                source,
            })?;
            if n == 0 {
                break;
            }

            let is_first_chunk = offset == 0;
            let chunk = buf[..n].to_vec();
            let chunk_offset = offset;

            retry_with_backoff(self.retry, cancel, |_attempt| {
                let url = url.clone();
                let chunk = chunk.clone();
                async move {
                    tracing::debug!(
                        url = %redact_url(&url),
                        offset = chunk_offset,
                        n,
                        size,
                        "webdav put (chunk)"
                    );
                    let mut req = self
                        .authed(self.http.put(url.clone()))
                        .header(CONTENT_TYPE, "application/octet-stream")
                        .header(CONTENT_LENGTH, n as u64);
                    if !is_first_chunk {
                        req = req.header(
                            CONTENT_RANGE,
                            format!("bytes {chunk_offset}-{}/{size}", chunk_offset + n as u64 - 1),
                        );
                    }
                    let res = req.body(chunk.clone()).send().await.map_err(|source| WebDavError::Transport {
                        method: "PUT",
                        path: path.to_string(),
                        source,
                    })?;
                    match res.status() {
                        StatusCode::OK | StatusCode::CREATED | StatusCode::PARTIAL_CONTENT => Ok(()),
                        s => {
                            let retry_after = parse_retry_after(&res);
                            let message = res.text().await.unwrap_or_default();
                            Err(with_retry_after(WebDavError::from_status("PUT", path, s, message), retry_after))
                        }
                    }
                }
            })
            .await?;

            offset += n as u64;
            on_chunk(offset);
        }

        Ok(())
    }
}

enum MkcolOutcome {
    Created,
    AlreadyExists,
    MissingParent,
}

impl<A: AuthProvider> HttpWebDavClient<A> {
    async fn mkcol_once(&self, path: &str, cancel: &CancellationToken) -> Result<MkcolOutcome, WebDavError> {
        let url = self.resolve(path)?;
        retry_with_backoff(self.retry, cancel, |_attempt| {
            let url = url.clone();
            async move {
                tracing::debug!(url = %redact_url(&url), "webdav mkcol");
                let res = self
                    .authed(self.http.request(Method::from_bytes(b"MKCOL").unwrap(), url.clone()))
                    .send()
                    .await
                    .map_err(|source| WebDavError::Transport {
                        method: "MKCOL",
                        path: path.to_string(),
                        source,
                    })?;
                match res.status() {
                    StatusCode::CREATED => Ok(MkcolOutcome::Created),
                    StatusCode::METHOD_NOT_ALLOWED => Ok(MkcolOutcome::AlreadyExists),
                    StatusCode::CONFLICT => Ok(MkcolOutcome::MissingParent),
                    s => {
                        let retry_after = parse_retry_after(&res);
                        let message = res.text().await.unwrap_or_default();
                        Err(with_retry_after(WebDavError::from_status("MKCOL", path, s, message), retry_after))
                    }
                }
            }
        })
        .await
    }

    async fn move_or_copy(
        &self,
        method: Method,
        verb: &'static str,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WebDavError> {
        let url = self.resolve(from)?;
        let destination = self.resolve(to)?;
        retry_with_backoff(self.retry, cancel, |_attempt| {
            let url = url.clone();
            let destination = destination.clone();
            let method = method.clone();
            async move {
                tracing::debug!(url = %redact_url(&url), destination = %redact_url(&destination), verb, "webdav move/copy");
                let res = self
                    .authed(self.http.request(method.clone(), url.clone()))
                    .header("Destination", destination.as_str())
                    .header("Overwrite", "T")
                    .send()
                    .await
                    .map_err(|source| WebDavError::Transport {
                        method: verb,
                        path: from.to_string(),
                        source,
                    })?;
                match res.status() {
                    s if s.is_success() => Ok(()),
                    s => {
                        let retry_after = parse_retry_after(&res);
                        let message = res.text().await.unwrap_or_default();
                        Err(with_retry_after(WebDavError::from_status(verb, from, s, message), retry_after))
                    }
                }
            }
        })
        .await
    }
}

fn parent_of(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => String::new(),
    }
}

fn with_retry_after(error: WebDavError, retry_after: Option<Duration>) -> WebDavError {
    match error {
        WebDavError::Temporary { method, path, status, .. } => WebDavError::Temporary {
            method,
            path,
            status,
            retry_after,
        },
        other => other,
    }
}

fn parse_retry_after(res: &reqwest::Response) -> Option<Duration> {
    let v = res.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();
    if v.is_empty() {
        return None;
    }
    if let Ok(secs) = v.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let t = httpdate::parse_http_date(v).ok()?;
    Some(crate::xml::duration_since_now(t))
}

async fn discard(reader: &mut (dyn AsyncRead + Unpin + Send), mut n: u64) -> std::io::Result<()> {
    let mut buf = [0u8; 64 * 1024];
    while n > 0 {
        let take = n.min(buf.len() as u64) as usize;
        let read = reader.read(&mut buf[..take]).await?;
        if read == 0 {
            break;
        }
        n -= read as u64;
    }
    Ok(())
}

/// Reads until `buf` is full or EOF; a short read before EOF is only valid
/// for the final chunk (spec.md §4.C), which this naturally produces since
/// the caller stops the loop once `n == 0`.
async fn read_fill(reader: &mut (dyn AsyncRead + Unpin + Send), buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
