//! Network surface: a length-delimited frame protocol over TCP.
//!
//! - [`codec`]  — frame layout and the `Framed` codec
//! - [`server`] — accept loop, per-call handling, graceful shutdown
//! - [`client`] — upload, download and atomic persist of results

pub mod client;
pub mod codec;
pub mod server;
