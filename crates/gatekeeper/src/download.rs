use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{pin_mut, Stream, StreamExt};
use reqwest::Method;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_DOWNLOAD_TIMEOUT_SECS};
use crate::error::{GateKeeperError, Result};
use crate::session::{HttpRequest, HttpSession, RequestOptions};

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub timeout: Duration,
    pub chunk_size: usize,
    /// Extra headers/query for the GET. Its timeout is replaced by `timeout`.
    pub request: RequestOptions,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            request: RequestOptions::default(),
        }
    }
}

impl DownloadOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }
}

/// Streams `url` into `target_path`, creating or truncating the file.
///
/// A failed transfer can leave a truncated file behind. Returns the number of
/// bytes written.
pub async fn download(
    session: &dyn HttpSession,
    url: &str,
    target_path: impl AsRef<Path>,
    options: DownloadOptions,
) -> Result<u64> {
    if options.chunk_size == 0 {
        return Err(GateKeeperError::Config("chunk size must be positive".into()));
    }

    let request = options.request.timeout(options.timeout);
    let response = session
        .execute(HttpRequest::new(Method::GET, url, request))
        .await?
        .error_for_status()
        .map_err(|e| GateKeeperError::Network(format!("Download of {} failed: {}", url, e)))?;

    write_stream(response.bytes_stream(), target_path.as_ref(), options.chunk_size).await
}

/// Writes `stream` to `path` in `chunk_size`-byte pieces, whatever sizes the
/// stream yields.
pub async fn write_stream<S, E>(stream: S, path: &Path, chunk_size: usize) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Display,
{
    if chunk_size == 0 {
        return Err(GateKeeperError::Config("chunk size must be positive".into()));
    }

    let mut file = File::create(path)
        .await
        .map_err(|e| GateKeeperError::Io(format!("Cannot create {}: {}", path.display(), e)))?;

    pin_mut!(stream);
    let mut pending = BytesMut::with_capacity(chunk_size);
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GateKeeperError::Network(format!("Download interrupted: {}", e)))?;
        pending.extend_from_slice(&chunk);

        while pending.len() >= chunk_size {
            let piece = pending.split_to(chunk_size);
            write_piece(&mut file, &piece, path).await?;
            written += piece.len() as u64;
        }
    }

    if !pending.is_empty() {
        write_piece(&mut file, &pending, path).await?;
        written += pending.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| GateKeeperError::Io(format!("Cannot flush {}: {}", path.display(), e)))?;

    debug!("Wrote {} bytes to {}", written, path.display());
    Ok(written)
}

async fn write_piece(file: &mut File, piece: &[u8], path: &Path) -> Result<()> {
    file.write_all(piece)
        .await
        .map_err(|e| GateKeeperError::Io(format!("Cannot write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{text_response, FakeSession};
    use futures::stream;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = std::result::Result<Bytes, String>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let session = FakeSession::new(|_| Ok(text_response(200, "hello world")));

        let written = download(
            &session,
            "http://example.com/file",
            &target,
            DownloadOptions::default().with_chunk_size(4),
        )
        .await
        .unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello world");

        let request = session.last_request().unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.options.timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_chunk_boundaries_do_not_matter() {
        let parts: &[&'static [u8]] = &[b"he", b"llo ", b"", b"w", b"orld, this is tor\n"];
        let expected: Vec<u8> = parts.concat();

        for chunk_size in [1, 3, 4, 7, 8192] {
            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("out.bin");

            let written = write_stream(chunks(parts), &target, chunk_size).await.unwrap();

            assert_eq!(written, expected.len() as u64);
            assert_eq!(std::fs::read(&target).unwrap(), expected, "chunk size {}", chunk_size);
        }
    }

    #[tokio::test]
    async fn test_existing_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        std::fs::write(&target, b"a much longer previous download").unwrap();

        write_stream(chunks(&[&b"new"[..]]), &target, 8192).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_error_status_fails_before_touching_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing.bin");
        let session = FakeSession::new(|_| Ok(text_response(404, "not found")));

        let err = download(&session, "http://example.com/missing", &target, DownloadOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, GateKeeperError::Network(_)));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_stream_error_is_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("partial.bin");
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err("connection reset".to_string()),
        ]);

        let err = write_stream(broken, &target, 4).await.unwrap_err();
        assert!(matches!(err, GateKeeperError::Network(_)));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_stream(chunks(&[&b"x"[..]]), &dir.path().join("x"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GateKeeperError::Config(_)));
    }
}
