//! Chunked file transfer between a byte-chunk stream and a local file.
//!
//! Both directions are transport-agnostic: the inbound side is any
//! `Stream<Item = io::Result<Bytes>>`, the outbound side any
//! `Sink<Bytes, Error = io::Error>`. The RPC layer adapts its framed TCP
//! connection to these shapes; tests plug in channels and in-memory streams.
//!
//! There is no reordering, deduplication, retry or content inspection here.
//! A single failed chunk aborts the whole transfer, and bytes already written
//! to disk stay there — removing them is the caller's job.

use crate::error::ServiceError;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::io;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Drain `chunks` into `destination`, creating or truncating it.
///
/// Returns the number of bytes written once the stream ends.
pub async fn receive<S>(chunks: &mut S, destination: &Path) -> Result<u64, ServiceError>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let mut file = tokio::fs::File::create(destination).await.map_err(|e| {
        ServiceError::io(
            format!("Failed to create temporary file: {}", destination.display()),
            e,
        )
    })?;

    let mut total: u64 = 0;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| ServiceError::io("Error reading from stream", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ServiceError::io("Error writing to file", e))?;
        total += chunk.len() as u64;
    }

    // tokio's File hands writes to a blocking thread; flush waits for them.
    file.flush()
        .await
        .map_err(|e| ServiceError::io("Error writing to file", e))?;

    debug!("Received {} bytes into {}", total, destination.display());
    Ok(total)
}

/// Stream `source` into `sink` in windows of `window` bytes.
///
/// Every chunk except possibly the last is exactly `window` bytes long; an
/// empty file produces no chunks at all. The sink is flushed before
/// returning. Returns the number of bytes sent.
pub async fn send<K>(sink: &mut K, source: &Path, window: usize) -> Result<u64, ServiceError>
where
    K: Sink<Bytes, Error = io::Error> + Unpin,
{
    if window == 0 {
        return Err(ServiceError::Internal("transfer window must be > 0".into()));
    }

    let mut file = tokio::fs::File::open(source).await.map_err(|e| {
        ServiceError::io(
            format!("Failed to open file for sending: {}", source.display()),
            e,
        )
    })?;

    let mut total: u64 = 0;
    loop {
        let chunk = read_window(&mut file, window)
            .await
            .map_err(|e| ServiceError::io("Error reading file for sending", e))?;
        if chunk.is_empty() {
            break;
        }
        let len = chunk.len() as u64;
        sink.send(chunk)
            .await
            .map_err(|e| ServiceError::io("Failed to send chunk", e))?;
        total += len;
    }

    sink.flush()
        .await
        .map_err(|e| ServiceError::io("Failed to send chunk", e))?;

    debug!("Sent {} bytes from {}", total, source.display());
    Ok(total)
}

/// Fill one window, tolerating short reads. Returns fewer bytes only at EOF.
async fn read_window(file: &mut tokio::fs::File, window: usize) -> io::Result<Bytes> {
    let mut buf = vec![0u8; window];
    let mut filled = 0;
    while filled < window {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::stream;
    use std::path::PathBuf;
    use std::pin::Pin;

    /// Deterministic, non-repeating-looking payload.
    fn payload(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
            .collect()
    }

    fn chunked(data: &[u8], size: usize) -> Vec<io::Result<Bytes>> {
        data.chunks(size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    async fn send_collect(path: &Path, window: usize) -> (u64, Vec<Bytes>) {
        let (tx, rx) = mpsc::unbounded::<Bytes>();
        let mut sink = tx.sink_map_err(io::Error::other);
        let sent = send(&mut sink, path, window).await.unwrap();
        drop(sink);
        (sent, rx.collect().await)
    }

    #[tokio::test]
    async fn round_trip_is_bit_exact_for_any_window() {
        let dir = tempfile::tempdir().unwrap();
        for len in [0usize, 1, 7, 4096, 65_536, 100_003] {
            let data = payload(len);
            for window in [1usize, 3, 1024, 65_536, 1 << 20] {
                if len > 20_000 && window < 1024 {
                    continue;
                }
                let inbound = dir.path().join(format!("in_{len}_{window}"));
                let mut src = stream::iter(chunked(&data, 777));
                let received = receive(&mut src, &inbound).await.unwrap();
                assert_eq!(received, len as u64);

                let (sent, chunks) = send_collect(&inbound, window).await;
                assert_eq!(sent, len as u64);

                let expected_chunks = len.div_ceil(window);
                assert_eq!(chunks.len(), expected_chunks, "len={len} window={window}");
                if let Some((last, full)) = chunks.split_last() {
                    assert!(full.iter().all(|c| c.len() == window));
                    assert!(!last.is_empty() && last.len() <= window);
                }

                let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
                assert_eq!(reassembled, data, "len={len} window={window}");
            }
        }
    }

    #[tokio::test]
    async fn ten_mib_in_64k_windows_is_160_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");
        let data = payload(10 * 1024 * 1024);
        std::fs::write(&path, &data).unwrap();

        let (sent, chunks) = send_collect(&path, 64 * 1024).await;
        assert_eq!(sent, data.len() as u64);
        assert_eq!(chunks.len(), 160);
        assert!(chunks.iter().all(|c| c.len() == 64 * 1024));
    }

    #[tokio::test]
    async fn empty_file_produces_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let (sent, chunks) = send_collect(&path, 64 * 1024).await;
        assert_eq!(sent, 0);
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn receive_from_channel_preserves_order() {
        use tokio_stream::wrappers::ReceiverStream;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("ordered.bin");
        let (tx, rx) = tokio::sync::mpsc::channel::<io::Result<Bytes>>(4);

        let producer = tokio::spawn(async move {
            for i in 0u8..100 {
                tx.send(Ok(Bytes::from(vec![i; 10]))).await.unwrap();
            }
        });

        let mut inbound = ReceiverStream::new(rx);
        let n = receive(&mut inbound, &dest).await.unwrap();
        producer.await.unwrap();

        assert_eq!(n, 1000);
        let written = std::fs::read(&dest).unwrap();
        for (i, block) in written.chunks(10).enumerate() {
            assert!(block.iter().all(|&b| b == i as u8));
        }
    }

    #[tokio::test]
    async fn receive_into_missing_directory_is_io_error() {
        let dest = PathBuf::from("/definitely/not/a/real/dir/file.bin");
        let mut src = stream::iter(vec![Ok(Bytes::from_static(b"abc"))]);
        let err = receive(&mut src, &dest).await.unwrap_err();
        assert!(matches!(err, ServiceError::Io { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn stream_error_mid_transfer_leaves_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial.bin");
        let mut src = stream::iter(vec![
            Ok(Bytes::from_static(b"first")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away")),
            Ok(Bytes::from_static(b"never")),
        ]);

        let err = receive(&mut src, &dest).await.unwrap_err();
        assert!(matches!(err, ServiceError::Io { .. }));
        // No implicit rollback.
        assert_eq!(std::fs::read(&dest).unwrap(), b"first");
    }

    #[tokio::test]
    async fn send_missing_source_is_io_error() {
        let (tx, _rx) = mpsc::unbounded::<Bytes>();
        let mut sink = tx.sink_map_err(io::Error::other);
        let err = send(&mut sink, Path::new("/no/such/file.pdf"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Io { .. }));
    }

    #[tokio::test]
    async fn rejected_chunk_aborts_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        std::fs::write(&path, payload(10_000)).unwrap();

        // Accept two chunks, then behave like a closed peer.
        let mut sink: Pin<Box<dyn Sink<Bytes, Error = io::Error> + Send>> =
            Box::pin(futures::sink::unfold(0usize, |accepted, _chunk: Bytes| async move {
                if accepted >= 2 {
                    Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
                } else {
                    Ok(accepted + 1)
                }
            }));

        let err = send(&mut sink, &path, 1000).await.unwrap_err();
        match err {
            ServiceError::Io { context, .. } => assert_eq!(context, "Failed to send chunk"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_window_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        std::fs::write(&path, b"abc").unwrap();
        let (tx, _rx) = mpsc::unbounded::<Bytes>();
        let mut sink = tx.sink_map_err(io::Error::other);
        assert!(send(&mut sink, &path, 0).await.is_err());
    }
}
