//! Client for the four remote operations.
//!
//! A call uploads a local file, then writes the streamed result into a
//! temporary file next to the destination. The temporary file is renamed onto
//! the destination only after the server reports success, so a failed call
//! never leaves a partial or stale output behind.

use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_BYTES};
use crate::error::ServiceError;
use crate::pipeline::registry::{OperationArgs, OperationKind};
use crate::pipeline::transfer;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::rpc::codec::{CallHeader, CallStatus, Frame, FrameCodec};
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// Default time allowed for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for a status frame after the upload was cut off.
const STATUS_AFTER_FAILURE_TIMEOUT: Duration = Duration::from_secs(5);

type Connection = Framed<TcpStream, FrameCodec>;

/// Calls a remote file processor.
#[derive(Clone)]
pub struct FileProcessorClient {
    addr: String,
    chunk_size: usize,
    max_message_bytes: usize,
    connect_timeout: Duration,
    progress: ProgressCallback,
}

impl fmt::Debug for FileProcessorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileProcessorClient")
            .field("addr", &self.addr)
            .field("chunk_size", &self.chunk_size)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl FileProcessorClient {
    /// `addr` is anything `TcpStream::connect` accepts, e.g. `"localhost:50051"`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Upload window size. Zero is treated as one byte.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = callback;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Compress a PDF with Ghostscript's `/ebook` settings.
    pub async fn compress_pdf(&self, input: &Path, output: &Path) -> Result<u64, ServiceError> {
        self.call(OperationKind::CompressPdf, &OperationArgs::default(), input, output)
            .await
    }

    /// Extract the text layer of a PDF.
    pub async fn convert_to_txt(&self, input: &Path, output: &Path) -> Result<u64, ServiceError> {
        self.call(OperationKind::ConvertToText, &OperationArgs::default(), input, output)
            .await
    }

    /// Re-encode an image; `format` is one of jpg, jpeg, png, gif, bmp, tiff, webp.
    pub async fn convert_image_format(
        &self,
        input: &Path,
        output: &Path,
        format: &str,
    ) -> Result<u64, ServiceError> {
        self.call(
            OperationKind::ConvertImageFormat,
            &OperationArgs::format(format),
            input,
            output,
        )
        .await
    }

    /// Resize an image to exactly `width`x`height` (aspect ratio not preserved).
    pub async fn resize_image(
        &self,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
        format: Option<&str>,
    ) -> Result<u64, ServiceError> {
        let mut args = OperationArgs::resize(i64::from(width), i64::from(height));
        args.format = format.map(str::to_string);
        self.call(OperationKind::ResizeImage, &args, input, output)
            .await
    }

    /// Run one call. Returns the number of bytes written to `output`.
    ///
    /// # Errors
    /// * [`ServiceError::Io`] — local file access or connection failure
    /// * [`ServiceError::Remote`] — the server reported a failed status
    /// * [`ServiceError::Protocol`] — the server broke the frame sequence
    pub async fn call(
        &self,
        kind: OperationKind,
        args: &OperationArgs,
        input: &Path,
        output: &Path,
    ) -> Result<u64, ServiceError> {
        let result = self.call_inner(kind, args, input, output).await;
        match &result {
            Ok(bytes) => self.progress.on_call_complete(*bytes, None),
            Err(e) => self.progress.on_call_complete(0, Some(&e.to_string())),
        }
        result
    }

    async fn call_inner(
        &self,
        kind: OperationKind,
        args: &OperationArgs,
        input: &Path,
        output: &Path,
    ) -> Result<u64, ServiceError> {
        let total = tokio::fs::metadata(input)
            .await
            .map_err(|e| ServiceError::io(format!("Cannot read {}", input.display()), e))?
            .len();

        let mut conn = self.connect().await?;
        info!("Calling {} on {} ({} bytes)", kind.method(), self.addr, total);

        let header = CallHeader {
            method: kind.method().to_string(),
            args: args.clone(),
        };
        if let Err(upload_err) = self.upload(&mut conn, header, input, total).await {
            // The server may have rejected the call early and closed its read side.
            return match status_after_failure(&mut conn).await {
                Some(status) if !status.is_ok() => status.into_result(),
                _ => Err(upload_err),
            };
        }
        self.progress.on_upload_complete(total);

        self.download(&mut conn, output).await
    }

    async fn connect(&self) -> Result<Connection, ServiceError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                ServiceError::io(
                    format!("Failed to connect to {}", self.addr),
                    io::Error::new(io::ErrorKind::TimedOut, "connection timed out"),
                )
            })?
            .map_err(|e| ServiceError::io(format!("Failed to connect to {}", self.addr), e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {}", e);
        }
        Ok(Framed::new(stream, FrameCodec::new(self.max_message_bytes)))
    }

    async fn upload(
        &self,
        conn: &mut Connection,
        header: CallHeader,
        input: &Path,
        total: u64,
    ) -> Result<(), ServiceError> {
        self.progress.on_upload_start(&header.method, total);
        conn.send(Frame::Open(header))
            .await
            .map_err(|e| ServiceError::io("Failed to open call", e))?;

        let progress = Arc::clone(&self.progress);
        let mut sent: u64 = 0;
        let mut chunks = (&mut *conn).with(move |chunk: Bytes| {
            sent += chunk.len() as u64;
            progress.on_upload_progress(sent, total);
            future::ready(Ok::<_, io::Error>(Frame::Chunk(chunk)))
        });
        transfer::send(&mut chunks, input, self.chunk_size).await?;

        conn.send(Frame::End)
            .await
            .map_err(|e| ServiceError::io("Failed to finish upload", e))
    }

    async fn download(&self, conn: &mut Connection, output: &Path) -> Result<u64, ServiceError> {
        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let staging = tempfile::Builder::new()
            .prefix(".fileproc-")
            .tempfile_in(dir)
            .map_err(|e| {
                ServiceError::io(format!("Failed to create file in {}", dir.display()), e)
            })?;
        let handle = staging
            .reopen()
            .map_err(|e| ServiceError::io("Failed to open staging file", e))?;
        let mut file = tokio::fs::File::from_std(handle);

        let mut received: u64 = 0;
        let status = loop {
            match conn.next().await {
                Some(Ok(Frame::Chunk(data))) => {
                    file.write_all(&data)
                        .await
                        .map_err(|e| ServiceError::io("Error writing to file", e))?;
                    received += data.len() as u64;
                    self.progress.on_download_progress(received);
                }
                Some(Ok(Frame::Status(status))) => break status,
                Some(Ok(other)) => {
                    return Err(ServiceError::Protocol(format!(
                        "unexpected {} frame in response",
                        other.name()
                    )))
                }
                Some(Err(e)) => return Err(ServiceError::io("Error reading from stream", e)),
                None => {
                    return Err(ServiceError::Protocol(
                        "connection closed before the call status".into(),
                    ))
                }
            }
        };
        file.flush()
            .await
            .map_err(|e| ServiceError::io("Error writing to file", e))?;
        drop(file);

        let reported = status.into_result()?;
        if reported != received {
            return Err(ServiceError::Protocol(format!(
                "server reported {reported} bytes but {received} arrived"
            )));
        }

        staging.persist(output).map_err(|e| {
            ServiceError::io(format!("Failed to save {}", output.display()), e.error)
        })?;
        info!("Saved {} bytes to {}", received, output.display());
        Ok(received)
    }
}

/// Skip any result chunks and return the status frame, if one arrives.
async fn status_after_failure(conn: &mut Connection) -> Option<CallStatus> {
    let wait = async {
        loop {
            match conn.next().await {
                Some(Ok(Frame::Status(status))) => return Some(status),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    };
    tokio::time::timeout(STATUS_AFTER_FAILURE_TIMEOUT, wait)
        .await
        .ok()
        .flatten()
}
