//! TCP server: one call per connection.
//!
//! The accept loop spawns one task per connection into a [`JoinSet`]. When the
//! shutdown token fires, the listener is dropped, in-flight calls get
//! `shutdown_grace` to finish, and whatever remains is aborted. Aborting a
//! call drops its pipeline future, which kills a running converter
//! (`kill_on_drop`) and removes the call's artifacts (`Artifact::drop`).

use crate::config::ServiceConfig;
use crate::error::{ErrorCode, ServiceError};
use crate::pipeline::invoke::ToolRunner;
use crate::pipeline::registry::lookup;
use crate::rpc::codec::{CallHeader, CallStatus, Frame, FrameCodec};
use crate::service::OperationPipeline;
use bytes::Bytes;
use futures::{future, stream, FutureExt, SinkExt, Stream, StreamExt};
use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How long a rejected call keeps reading the rest of the upload so the
/// client can still read the status frame.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves the four operations over TCP.
#[derive(Debug, Clone)]
pub struct FileProcessorServer {
    config: Arc<ServiceConfig>,
    pipeline: Arc<OperationPipeline>,
}

impl FileProcessorServer {
    pub fn new(config: ServiceConfig) -> Self {
        let pipeline = OperationPipeline::new(&config);
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        }
    }

    /// Server whose pipeline runs converters through `runner`.
    pub fn with_runner(config: ServiceConfig, runner: Arc<dyn ToolRunner>) -> Self {
        let pipeline = OperationPipeline::with_runner(&config, runner);
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &OperationPipeline {
        &self.pipeline
    }

    /// Create the temp directory and bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServiceError> {
        self.pipeline.artifacts().ensure_base_dir().await.map_err(|e| {
            ServiceError::io(
                format!(
                    "Failed to create temp directory {}",
                    self.config.temp_dir.display()
                ),
                e,
            )
        })?;
        TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| ServiceError::io(format!("Failed to bind {}", self.config.listen_addr), e))
    }

    /// Bind, then serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` is cancelled.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServiceError> {
        let local = listener
            .local_addr()
            .map_err(|e| ServiceError::io("Failed to read listener address", e))?;
        info!(
            "File processor server listening on {} (temp dir {})",
            local,
            self.config.temp_dir.display()
        );

        let mut calls = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("set_nodelay failed for {}: {}", peer, e);
                        }
                        let pipeline = Arc::clone(&self.pipeline);
                        let max_message_bytes = self.config.max_message_bytes;
                        calls.spawn(async move {
                            serve_connection(&pipeline, stream, &peer.to_string(), max_message_bytes).await;
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = joined {
                        error!("Call task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        let grace = self.config.shutdown_grace;
        if !calls.is_empty() {
            info!(
                "Shutting down; waiting up to {}s for {} in-flight call(s)",
                grace.as_secs(),
                calls.len()
            );
        }
        let drained = tokio::time::timeout(grace, async {
            while calls.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Grace period elapsed; aborting {} call(s)", calls.len());
            calls.abort_all();
            while calls.join_next().await.is_some() {}
        }
        info!("Server stopped");
        Ok(())
    }
}

/// Handle one call on an established connection.
///
/// Never fails: every outcome is reported to the peer as a status frame when
/// the connection still allows it, and logged otherwise.
pub async fn serve_connection<T>(
    pipeline: &OperationPipeline,
    io: T,
    peer: &str,
    max_message_bytes: usize,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut framed = Framed::new(io, FrameCodec::new(max_message_bytes));

    let header = match framed.next().await {
        Some(Ok(Frame::Open(header))) => header,
        Some(Ok(other)) => {
            let err = ServiceError::Protocol(format!("expected Open frame, got {}", other.name()));
            warn!(peer = %peer, "{}", err);
            reject(&mut framed, &err).await;
            return;
        }
        Some(Err(e)) => {
            let err = ServiceError::Protocol(e.to_string());
            warn!(peer = %peer, "{}", err);
            reject(&mut framed, &err).await;
            return;
        }
        None => {
            debug!(peer = %peer, "Connection closed before a call was opened");
            return;
        }
    };

    let span = info_span!("call", method = %header.method, peer = %peer);
    handle_call(pipeline, framed, header).instrument(span).await;
}

async fn handle_call<T>(
    pipeline: &OperationPipeline,
    framed: Framed<T, FrameCodec>,
    header: CallHeader,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut sink, mut frames) = framed.split();

    let Some(op) = lookup(&header.method) else {
        let err = ServiceError::Protocol(format!("Unknown method '{}'", header.method));
        warn!("{}", err);
        finish(&mut sink, &mut frames, CallStatus::from_error(&err)).await;
        return;
    };

    let outcome = {
        let mut inbound = Box::pin(upload_chunks(&mut frames));
        let mut outbound = (&mut sink)
            .with(|chunk: Bytes| future::ready(Ok::<_, io::Error>(Frame::Chunk(chunk))));
        AssertUnwindSafe(pipeline.execute(op.kind, &header.args, &mut inbound, &mut outbound))
            .catch_unwind()
            .await
    };

    let status = match outcome {
        Ok(Ok(report)) => CallStatus::ok(report.output_bytes),
        Ok(Err(e)) => CallStatus::from_error(&e),
        Err(panic) => {
            error!("Call panicked: {}", panic_message(panic.as_ref()));
            CallStatus::failed(ErrorCode::Internal, "Internal error while processing the call")
        }
    };
    finish(&mut sink, &mut frames, status).await;
}

/// Inbound `Chunk` frames as a byte stream that ends at the `End` frame.
fn upload_chunks<S>(frames: S) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    S: Stream<Item = io::Result<Frame>> + Unpin + Send,
{
    stream::unfold(Some(frames), |state| async move {
        let mut frames = state?;
        match frames.next().await {
            Some(Ok(Frame::Chunk(data))) => Some((Ok(data), Some(frames))),
            Some(Ok(Frame::End)) => None,
            Some(Ok(other)) => Some((
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected {} frame during upload", other.name()),
                )),
                None,
            )),
            Some(Err(e)) => Some((Err(e), None)),
            None => Some((
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before end of upload",
                )),
                None,
            )),
        }
    })
}

/// Send the terminal status, close our half, and on failure keep reading the
/// rest of the upload so the peer is not reset before it reads the status.
async fn finish<K, S>(sink: &mut K, frames: &mut S, status: CallStatus)
where
    K: futures::Sink<Frame, Error = io::Error> + Unpin,
    S: Stream<Item = io::Result<Frame>> + Unpin,
{
    let failed = !status.is_ok();
    if let Err(e) = sink.send(Frame::Status(status)).await {
        warn!("Failed to deliver call status: {}", e);
        return;
    }
    if let Err(e) = sink.close().await {
        debug!("Failed to close connection: {}", e);
    }
    if failed {
        let drain = async {
            while let Some(Ok(frame)) = frames.next().await {
                if frame == Frame::End {
                    break;
                }
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("Peer kept uploading after the call failed; closing");
        }
    }
}

async fn reject<T>(framed: &mut Framed<T, FrameCodec>, err: &ServiceError)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    if framed
        .send(Frame::Status(CallStatus::from_error(err)))
        .await
        .is_ok()
    {
        let _ = framed.close().await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
