//! Configuration types for the file-processing service.
//!
//! All server behaviour is controlled through [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. The config is shared read-only across every
//! in-flight call, so nothing in here may change once the server is running.

use crate::error::ServiceError;
use std::ffi::OsString;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default transfer window: 64 KiB per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default per-message ceiling in both directions: 100 MiB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50051";

/// Configuration for the file-processing server.
///
/// Built via [`ServiceConfig::builder()`] or using [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use fileproc::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .listen_addr("127.0.0.1:6000".parse().unwrap())
///     .chunk_size(32 * 1024)
///     .tool_timeout(Duration::from_secs(120))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Address the listener binds to. Default: `0.0.0.0:50051`.
    pub listen_addr: SocketAddr,

    /// Directory that holds per-call input and output artifacts.
    /// Default: the platform temp directory.
    pub temp_dir: PathBuf,

    /// Size of each outbound chunk in bytes. Default: 64 KiB.
    ///
    /// Must not exceed `max_message_bytes`, otherwise the peer's codec would
    /// reject the frame.
    pub chunk_size: usize,

    /// Largest frame accepted or produced in either direction. Default: 100 MiB.
    pub max_message_bytes: usize,

    /// External converter programs.
    pub tools: ToolPaths,

    /// Kill a converter that runs longer than this. Default: no limit.
    pub tool_timeout: Option<Duration>,

    /// How long in-flight calls may keep running after shutdown is requested.
    /// Default: 10 s.
    pub shutdown_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 50051)),
            temp_dir: std::env::temp_dir(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            tools: ToolPaths::default(),
            tool_timeout: None,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("listen_addr", &self.listen_addr)
            .field("temp_dir", &self.temp_dir)
            .field("chunk_size", &self.chunk_size)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("tools", &self.tools)
            .field("tool_timeout", &self.tool_timeout)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.listen_addr = addr;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = bytes;
        self
    }

    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.config.max_message_bytes = bytes;
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = Some(timeout);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ServiceError> {
        let c = &self.config;
        if c.max_message_bytes == 0 {
            return Err(ServiceError::InvalidConfig(
                "max message size must be ≥ 1 byte".into(),
            ));
        }
        if c.chunk_size == 0 || c.chunk_size > c.max_message_bytes {
            return Err(ServiceError::InvalidConfig(format!(
                "chunk size must be 1–{} bytes, got {}",
                c.max_message_bytes, c.chunk_size
            )));
        }
        if c.tool_timeout == Some(Duration::ZERO) {
            return Err(ServiceError::InvalidConfig(
                "tool timeout must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── External tools ───────────────────────────────────────────────────────

/// A converter program plus any arguments that must precede the operation's own.
///
/// ImageMagick 7 on Windows is invoked as `magick convert …`, so the program
/// alone is not enough to describe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub program: PathBuf,
    pub leading_args: Vec<OsString>,
}

impl ToolSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.leading_args.push(arg.into());
        self
    }
}

/// The three converters the registry knows how to drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// Ghostscript, used for PDF compression.
    pub ghostscript: ToolSpec,
    /// Poppler's `pdftotext`.
    pub pdftotext: ToolSpec,
    /// ImageMagick, used for format conversion and resizing.
    pub imagemagick: ToolSpec,
}

impl Default for ToolPaths {
    #[cfg(windows)]
    fn default() -> Self {
        Self {
            ghostscript: ToolSpec::new("gswin64c"),
            pdftotext: ToolSpec::new("pdftotext"),
            imagemagick: ToolSpec::new("magick").with_leading_arg("convert"),
        }
    }

    #[cfg(not(windows))]
    fn default() -> Self {
        Self {
            ghostscript: ToolSpec::new("gs"),
            pdftotext: ToolSpec::new("pdftotext"),
            imagemagick: ToolSpec::new("convert"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_limits() {
        let c = ServiceConfig::default();
        assert_eq!(c.chunk_size, 64 * 1024);
        assert_eq!(c.max_message_bytes, 100 * 1024 * 1024);
        assert_eq!(c.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert!(c.tool_timeout.is_none());
    }

    #[test]
    fn builder_accepts_valid_values() {
        let c = ServiceConfig::builder()
            .chunk_size(1024)
            .max_message_bytes(4096)
            .shutdown_grace(Duration::from_secs(1))
            .build()
            .unwrap();
        assert_eq!(c.chunk_size, 1024);
        assert_eq!(c.max_message_bytes, 4096);
    }

    #[test]
    fn chunk_larger_than_message_is_rejected() {
        let err = ServiceConfig::builder()
            .chunk_size(8192)
            .max_message_bytes(4096)
            .build()
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidConfig(_)));
    }

    #[test]
    fn zero_chunk_is_rejected() {
        assert!(ServiceConfig::builder().chunk_size(0).build().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(ServiceConfig::builder()
            .tool_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn tool_spec_leading_args() {
        let spec = ToolSpec::new("magick").with_leading_arg("convert");
        assert_eq!(spec.program, PathBuf::from("magick"));
        assert_eq!(spec.leading_args, vec![OsString::from("convert")]);
    }
}
