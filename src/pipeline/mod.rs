//! Building blocks of a single call.
//!
//! Each submodule implements one concern and is independently testable; the
//! orchestration that strings them together lives in [`crate::service`].
//!
//! ## Data Flow
//!
//! ```text
//! chunks ──▶ transfer::receive ──▶ invoke ──▶ (validate) ──▶ transfer::send ──▶ chunks
//!              (input artifact)   (converter)                (output artifact)
//! ```
//!
//! 1. [`registry`] — the fixed operation table: argument validation and
//!    command templates
//! 2. [`artifact`] — collision-free temp paths and guaranteed cleanup
//! 3. [`transfer`] — chunked stream ⇄ file copying, bit-exact in both directions
//! 4. [`invoke`]   — runs the converter as an argument list, merged output capture

pub mod artifact;
pub mod invoke;
pub mod registry;
pub mod transfer;
