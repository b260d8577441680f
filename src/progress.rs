//! Progress-callback trait for client-side transfer events.
//!
//! Pass an [`Arc<dyn TransferProgressCallback>`] to
//! [`crate::rpc::client::FileProcessorClient::progress_callback`] to observe a
//! call as it uploads the input and downloads the result.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a log line or a
//! channel of their own without the client knowing how the host application
//! reports progress.
//!
//! # Example
//!
//! ```rust
//! use fileproc::TransferProgressCallback;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! struct Uploaded(AtomicU64);
//!
//! impl TransferProgressCallback for Uploaded {
//!     fn on_upload_progress(&self, sent: u64, _total: u64) {
//!         self.0.store(sent, Ordering::Relaxed);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the client while a call is in flight.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait TransferProgressCallback: Send + Sync {
    /// Called once before the first chunk is uploaded.
    ///
    /// # Arguments
    /// * `method`      — remote method name, e.g. `"CompressPDF"`
    /// * `total_bytes` — size of the local input file
    fn on_upload_start(&self, method: &str, total_bytes: u64) {
        let _ = (method, total_bytes);
    }

    /// Called after each uploaded chunk.
    fn on_upload_progress(&self, sent_bytes: u64, total_bytes: u64) {
        let _ = (sent_bytes, total_bytes);
    }

    /// Called once the end-of-upload marker has been sent; the server is now
    /// running the converter.
    fn on_upload_complete(&self, total_bytes: u64) {
        let _ = total_bytes;
    }

    /// Called after each received result chunk.
    fn on_download_progress(&self, received_bytes: u64) {
        let _ = received_bytes;
    }

    /// Called once with the terminal outcome of the call.
    ///
    /// # Arguments
    /// * `output_bytes` — bytes received (0 on failure)
    /// * `error`        — the failure message, `None` on success
    fn on_call_complete(&self, output_bytes: u64, error: Option<&str>) {
        let _ = (output_bytes, error);
    }
}

/// A no-op implementation; the client default.
pub struct NoopProgressCallback;

impl TransferProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in the client.
pub type ProgressCallback = Arc<dyn TransferProgressCallback>;
