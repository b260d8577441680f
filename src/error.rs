//! Error types for the fileproc service.
//!
//! Every failure of a call collapses into one [`ServiceError`], which in turn
//! maps onto a single terminal status on the wire (see [`ErrorCode`]). There is
//! no partial or mid-transfer error reporting: a caller either receives the
//! complete output stream followed by `OK`, or one failed status with a
//! human-readable message.
//!
//! The variants follow the stage in which a call can fail:
//!
//! * [`ServiceError::InvalidArgument`] — before any I/O, while resolving arguments.
//! * [`ServiceError::Io`] — receiving the upload, reading or streaming the result.
//! * [`ServiceError::ToolLaunch`] / [`ServiceError::ToolExecution`] /
//!   [`ServiceError::ToolTimedOut`] — running the external converter.
//! * [`ServiceError::OutputMissing`] — the converter claimed success but left
//!   nothing behind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the fileproc library.
#[derive(Debug, Error)]
pub enum ServiceError {
    // ── Transfer errors ───────────────────────────────────────────────────
    /// Local file or stream read/write failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ── External tool errors ──────────────────────────────────────────────
    /// The converter process could not be started at all.
    #[error("Failed to launch '{program}': {source}\nCheck that the converter is installed and on PATH.")]
    ToolLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter ran but exited with a nonzero status.
    #[error("{tool} failed with code {status}: {output}")]
    ToolExecution {
        tool: String,
        status: i32,
        output: String,
    },

    /// The converter did not finish within the configured timeout and was killed.
    #[error("{tool} timed out after {secs}s and was terminated")]
    ToolTimedOut { tool: String, secs: u64 },

    /// The converter exited 0 but produced no usable output file.
    #[error("Output file was not created: '{path}'")]
    OutputMissing { path: PathBuf },

    // ── Request errors ────────────────────────────────────────────────────
    /// Operation arguments failed validation; no I/O was performed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The peer violated the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered the call with a failed status.
    #[error("Server returned {code}: {message}")]
    Remote { code: ErrorCode, message: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Wrap an I/O error with a short description of what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ServiceError::Io {
            context: context.into(),
            source,
        }
    }

    /// Status code reported to the caller for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Io { .. } => ErrorCode::IoError,
            ServiceError::ToolLaunch { .. } => ErrorCode::ToolLaunch,
            ServiceError::ToolExecution { .. } => ErrorCode::ToolExecution,
            ServiceError::ToolTimedOut { .. } => ErrorCode::ToolTimeout,
            ServiceError::OutputMissing { .. } => ErrorCode::OutputMissing,
            ServiceError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            ServiceError::Protocol(_) => ErrorCode::Protocol,
            ServiceError::Remote { code, .. } => *code,
            ServiceError::InvalidConfig(_) | ServiceError::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Terminal status code carried by the last frame of every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Ok,
    IoError,
    ToolLaunch,
    ToolExecution,
    ToolTimeout,
    OutputMissing,
    InvalidArgument,
    Protocol,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Ok => "OK",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::ToolLaunch => "TOOL_LAUNCH",
            ErrorCode::ToolExecution => "TOOL_EXECUTION",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::OutputMissing => "OUTPUT_MISSING",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}
