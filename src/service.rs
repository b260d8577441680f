//! The per-call pipeline shared by every operation.
//!
//! A call walks one state machine regardless of which operation it is:
//!
//! ```text
//! ReceivingInput ──▶ Invoking ──▶ ValidatingOutput ──▶ SendingOutput ──▶ Cleanup ──▶ Done
//!        │              │                │                   │
//!        └──────────────┴────────────────┴───────────────────┴──▶ Aborted (then Cleanup)
//! ```
//!
//! Operations differ only in their [`Operation`] descriptor and arguments.
//! Arguments are validated before any artifact is allocated, and both
//! artifacts are removed on every exit path, including a failed upload.

use crate::config::{ServiceConfig, ToolPaths};
use crate::error::ServiceError;
use crate::pipeline::artifact::{Artifact, TempArtifactManager};
use crate::pipeline::invoke::{ProcessInvoker, ToolRunner};
use crate::pipeline::registry::{Operation, OperationArgs, OperationKind, ResolvedArgs};
use crate::pipeline::transfer;
use bytes::Bytes;
use futures::{Sink, Stream};
use serde::Serialize;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// States of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReceivingInput,
    Invoking,
    ValidatingOutput,
    SendingOutput,
    Cleanup,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::ReceivingInput => "receiving-input",
            Stage::Invoking => "invoking",
            Stage::ValidatingOutput => "validating-output",
            Stage::SendingOutput => "sending-output",
            Stage::Cleanup => "cleanup",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Summary of a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallReport {
    pub operation: OperationKind,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub duration_ms: u64,
}

/// Drives calls from upload to cleanup.
pub struct OperationPipeline {
    artifacts: TempArtifactManager,
    tools: ToolPaths,
    runner: Arc<dyn ToolRunner>,
    chunk_size: usize,
}

impl fmt::Debug for OperationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationPipeline")
            .field("artifacts", &self.artifacts)
            .field("tools", &self.tools)
            .field("runner", &"<dyn ToolRunner>")
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl OperationPipeline {
    /// Pipeline that runs real converter processes.
    pub fn new(config: &ServiceConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessInvoker::new(config.tool_timeout)))
    }

    /// Pipeline with a caller-provided runner.
    pub fn with_runner(config: &ServiceConfig, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            artifacts: TempArtifactManager::new(&config.temp_dir),
            tools: config.tools.clone(),
            runner,
            chunk_size: config.chunk_size,
        }
    }

    pub fn artifacts(&self) -> &TempArtifactManager {
        &self.artifacts
    }

    /// Run one call: consume the upload from `input`, stream the result into `output`.
    ///
    /// # Errors
    /// Any [`ServiceError`]; by the time it is returned, no artifact of this
    /// call remains on disk.
    pub async fn execute<S, K>(
        &self,
        kind: OperationKind,
        args: &OperationArgs,
        input: &mut S,
        output: &mut K,
    ) -> Result<CallReport, ServiceError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
        K: Sink<Bytes, Error = io::Error> + Unpin + Send,
    {
        let start = Instant::now();
        let op = kind.descriptor();
        info!("Request received");

        // ── Arguments: validated before any I/O ──────────────────────────
        let resolved = op.resolve(args).inspect_err(|e| {
            error!("Rejected before transfer: {}", e);
        })?;

        let input_artifact = self.artifacts.allocate(op.input_prefix, op.input_extension);
        let output_artifact = self
            .artifacts
            .allocate(op.output_prefix, op.output_extension(&resolved));

        let mut stage = Stage::ReceivingInput;
        let outcome = self
            .drive(
                op,
                &resolved,
                &input_artifact,
                &output_artifact,
                input,
                output,
                &mut stage,
            )
            .await;

        if let Err(ref e) = outcome {
            error!(stage = %stage, "Aborted: {}", e);
        }

        // ── Cleanup: every path ──────────────────────────────────────────
        advance(&mut stage, Stage::Cleanup);
        release(input_artifact);
        release(output_artifact);

        let (input_bytes, output_bytes) = outcome?;
        advance(&mut stage, Stage::Done);

        let report = CallReport {
            operation: kind,
            input_bytes,
            output_bytes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Request completed successfully in {}ms ({} bytes in, {} bytes out)",
            report.duration_ms, report.input_bytes, report.output_bytes
        );
        Ok(report)
    }

    /// Everything between allocation and cleanup. Returns (bytes in, bytes out).
    #[allow(clippy::too_many_arguments)]
    async fn drive<S, K>(
        &self,
        op: &Operation,
        args: &ResolvedArgs,
        input_artifact: &Artifact,
        output_artifact: &Artifact,
        input: &mut S,
        output: &mut K,
        stage: &mut Stage,
    ) -> Result<(u64, u64), ServiceError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
        K: Sink<Bytes, Error = io::Error> + Unpin + Send,
    {
        // ── Step 1: Receive upload ───────────────────────────────────────
        let input_bytes = transfer::receive(input, input_artifact.path()).await?;
        info!(
            "Received {} bytes into {}",
            input_bytes,
            input_artifact.path().display()
        );

        // ── Step 2: Run converter ────────────────────────────────────────
        advance(stage, Stage::Invoking);
        let command = op.command(&self.tools, args, input_artifact.path(), output_artifact.path());
        info!("Executing: {}", command);
        let result = self.runner.run(&command).await?;
        if !result.success() {
            return Err(ServiceError::ToolExecution {
                tool: command.tool.to_string(),
                status: result.status,
                output: result.output.trim_end().to_string(),
            });
        }
        if !result.output.trim().is_empty() {
            debug!("{} output: {}", command.tool, result.output.trim_end());
        }

        // ── Step 3: Validate output ──────────────────────────────────────
        advance(stage, Stage::ValidatingOutput);
        if !output_artifact.exists() {
            return Err(ServiceError::OutputMissing {
                path: output_artifact.path().to_path_buf(),
            });
        }
        let output_size = output_artifact.size();
        if output_size == 0 && !op.allow_empty_output {
            warn!("{} produced an empty file", command.tool);
            return Err(ServiceError::OutputMissing {
                path: output_artifact.path().to_path_buf(),
            });
        }
        log_result(op, args, input_bytes, output_size);

        // ── Step 4: Stream result back ───────────────────────────────────
        advance(stage, Stage::SendingOutput);
        let output_bytes = transfer::send(output, output_artifact.path(), self.chunk_size).await?;

        Ok((input_bytes, output_bytes))
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!("{} → {}", stage, next);
    *stage = next;
}

fn release(artifact: Artifact) {
    let path = artifact.path().to_path_buf();
    if !artifact.cleanup() {
        warn!("Failed to remove temporary file {}", path.display());
    }
}

fn log_result(op: &Operation, args: &ResolvedArgs, input_size: u64, output_size: u64) {
    match (op.kind, args) {
        (OperationKind::CompressPdf, _) => {
            let reduction = if input_size == 0 {
                0.0
            } else {
                (1.0 - output_size as f64 / input_size as f64) * 100.0
            };
            info!(
                "Compressed from {} to {} bytes ({:.1}% reduction)",
                input_size, output_size, reduction
            );
        }
        (OperationKind::ResizeImage, ResolvedArgs::Resize { width, height, .. }) => {
            info!(
                "Resized from {} to {} bytes ({}x{})",
                input_size, output_size, width, height
            );
        }
        (_, ResolvedArgs::Format(format)) => {
            info!("Converted to {} ({} bytes)", format, output_size);
        }
        _ => info!("Converted to TXT ({} bytes)", output_size),
    }
}
