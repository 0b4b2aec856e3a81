use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Tees every byte that passes through into a running `blake3` digest
/// before delegating to the wrapped stream (spec.md §9: "the progress
/// reader/writer is a decorator around the underlying byte stream ...
/// model it as a wrapper type that ... delegates after side-effecting").
/// Grounded on the teacher's own `blake3`-based content checksums
/// (`bastion-backup::restore::hash_file_blake3`), applied here to
/// populate `ResumeState::checksum` instead of verifying a backup part.
///
/// The digest lives behind an `Arc<Mutex<_>>` so a caller can hold a
/// [`DigestHandle`] clone alongside the wrapper and read the running hash
/// (e.g. from a progress callback) without fighting the borrow checker over
/// the `&mut dyn AsyncRead` the transport layer also holds.
pub struct HashingReader<R> {
    inner: R,
    hasher: DigestHandle,
}

#[derive(Clone, Default)]
pub struct DigestHandle(Arc<Mutex<blake3::Hasher>>);

impl DigestHandle {
    pub fn new() -> Self {
        DigestHandle(Arc::new(Mutex::new(blake3::Hasher::new())))
    }

    pub fn hex(&self) -> String {
        self.0.lock().unwrap().finalize().to_hex().to_string()
    }

    fn update(&self, bytes: &[u8]) {
        self.0.lock().unwrap().update(bytes);
    }
}

impl<R: AsyncRead + Unpin> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        HashingReader { inner, hasher: DigestHandle::new() }
    }

    pub fn digest(&self) -> DigestHandle {
        self.hasher.clone()
    }

    pub fn finalize_hex(&self) -> String {
        self.hasher.hex()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if poll.is_ready() {
            this.hasher.update(&buf.filled()[before..]);
        }
        poll
    }
}

/// Write-side counterpart of [`HashingReader`], used when downloading: the
/// bytes are hashed as they are written to the local file, not as they
/// arrive over the wire, so a short write still only counts what actually
/// landed on disk.
pub struct HashingWriter<W> {
    inner: W,
    hasher: DigestHandle,
}

impl<W: AsyncWrite + Unpin> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        HashingWriter { inner, hasher: DigestHandle::new() }
    }

    pub fn digest(&self) -> DigestHandle {
        self.hasher.clone()
    }

    pub fn finalize_hex(&self) -> String {
        self.hasher.hex()
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.hasher.update(&buf[..*n]);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    use super::*;

    #[tokio::test]
    async fn reader_hash_matches_direct_blake3_of_the_bytes() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut reader = HashingReader::new(std::io::Cursor::new(data.clone()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, data);
        assert_eq!(reader.finalize_hex(), blake3::hash(&data).to_hex().to_string());
    }

    #[tokio::test]
    async fn writer_hash_matches_direct_blake3_of_the_bytes() {
        let data = b"0123456789".to_vec();
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(&data).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(writer.finalize_hex(), blake3::hash(&data).to_hex().to_string());
    }

    #[tokio::test]
    async fn digest_handle_observes_hash_while_reader_is_still_borrowed() {
        let data = b"streamed".to_vec();
        let mut reader = HashingReader::new(std::io::Cursor::new(data.clone()));
        let handle = reader.digest();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(handle.hex(), blake3::hash(&data).to_hex().to_string());
    }
}
