//! WebDAV protocol client: request/response layer, `PROPFIND` XML generation
//! and multistatus parsing, chunked `PUT`, `MOVE`/`COPY`, retry with
//! exponential backoff, and the WebDAV error taxonomy (spec.md §4.C).

pub mod auth;
pub mod client;
pub mod error;
pub mod hashing;
pub mod retry;
pub mod xml;

pub use auth::{redact_url, AuthProvider, BasicAuthProvider};
pub use client::{HttpWebDavClient, WebDavTransport};
pub use error::WebDavError;
pub use hashing::{DigestHandle, HashingReader, HashingWriter};
pub use retry::{retry_with_backoff, RetryConfig};
pub use xml::{parse_multistatus, parse_webdav_timestamp, RemoteEntry, PROPFIND_BODY};
