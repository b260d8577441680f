//! # fileproc
//!
//! A streaming file-transformation service: clients upload a file in chunks,
//! the server runs an external converter on it, and the result streams back.
//!
//! ## Why this crate?
//!
//! Ghostscript, pdftotext and ImageMagick already do the hard work. What they
//! lack is a network front end that accepts arbitrarily large inputs without
//! buffering them in memory, runs the tools safely, and never leaves temporary
//! files behind. This crate is that front end.
//!
//! ## Call Overview
//!
//! ```text
//! client
//!  │ Open{method, args}, Chunk*, End
//!  ▼
//! ┌─ 1. Resolve   look up the operation, validate arguments (no I/O yet)
//! ├─ 2. Receive   chunks → input artifact
//! ├─ 3. Invoke    converter as an argument list, merged stdout/stderr
//! ├─ 4. Validate  output artifact exists (and is non-empty where required)
//! ├─ 5. Send      output artifact → chunks
//! └─ 6. Cleanup   both artifacts removed on every path
//!  │ Chunk*, Status{code, message}
//!  ▼
//! client
//! ```
//!
//! ## Operations
//!
//! | Method               | Converter     | Arguments                         |
//! |----------------------|---------------|-----------------------------------|
//! | `CompressPDF`        | Ghostscript   | —                                 |
//! | `ConvertToTXT`       | pdftotext     | —                                 |
//! | `ConvertImageFormat` | ImageMagick   | `format` (default `png`)          |
//! | `ResizeImage`        | ImageMagick   | `width`, `height` (800×600), `format` (`jpg`) |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fileproc::{FileProcessorClient, FileProcessorServer, ServiceConfig};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .listen_addr("127.0.0.1:50051".parse()?)
//!         .build()?;
//!     let shutdown = CancellationToken::new();
//!     tokio::spawn(FileProcessorServer::new(config).run(shutdown.clone()));
//!
//!     let client = FileProcessorClient::new("127.0.0.1:50051");
//!     client
//!         .resize_image(Path::new("photo.png"), Path::new("thumb.jpg"), 800, 600, None)
//!         .await?;
//!     shutdown.cancel();
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fileproc` binary (clap + anyhow + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fileproc = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod rpc;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder, ToolPaths, ToolSpec};
pub use error::{ErrorCode, ServiceError};
pub use logging::{init_logging, LogSink, LoggingConfig, LoggingGuard};
pub use pipeline::artifact::{Artifact, TempArtifactManager};
pub use pipeline::invoke::{CommandResult, ProcessInvoker, ToolCommand, ToolRunner};
pub use pipeline::registry::{lookup, ImageFormat, Operation, OperationArgs, OperationKind};
pub use progress::{NoopProgressCallback, ProgressCallback, TransferProgressCallback};
pub use rpc::client::FileProcessorClient;
pub use rpc::codec::{CallHeader, CallStatus, Frame, FrameCodec};
pub use rpc::server::{serve_connection, FileProcessorServer};
pub use service::{CallReport, OperationPipeline, Stage};
