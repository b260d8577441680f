//! CLI binary for fileproc.
//!
//! `fileproc serve` runs the conversion server; every other subcommand is a
//! thin client call that uploads one file and saves the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fileproc::{
    init_logging, FileProcessorClient, FileProcessorServer, LoggingConfig, OperationArgs,
    OperationKind, ProgressCallback, ServiceConfig, ToolPaths, ToolSpec,
    TransferProgressCallback,
};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Upload bar, then a spinner while the server converts and streams back.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Connecting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl TransferProgressCallback for CliProgressCallback {
    fn on_upload_start(&self, method: &str, total_bytes: u64) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_bytes);
        self.bar.set_prefix(format!("{method} upload"));
    }

    fn on_upload_progress(&self, sent_bytes: u64, _total_bytes: u64) {
        self.bar.set_position(sent_bytes);
    }

    fn on_upload_complete(&self, _total_bytes: u64) {
        self.bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        self.bar.set_prefix("Converting");
        self.bar.set_message("waiting for the server…");
    }

    fn on_download_progress(&self, received_bytes: u64) {
        self.bar.set_prefix("Receiving");
        self.bar.set_message(HumanBytes(received_bytes).to_string());
    }

    fn on_call_complete(&self, _output_bytes: u64, _error: Option<&str>) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the server on the default port with a dedicated scratch directory
  fileproc serve --temp-dir /var/tmp/fileproc --log-file logs/fileproc.log

  # Compress a PDF
  fileproc compress-pdf report.pdf report.small.pdf

  # Extract text
  fileproc to-txt paper.pdf paper.txt

  # Convert an image to WebP
  fileproc convert-image photo.png photo.webp --format webp

  # Resize to exactly 800x600 (aspect ratio is not preserved)
  fileproc resize-image photo.jpg thumb.jpg --width 800 --height 600

REQUIRED CONVERTERS (server side):
  Operation            Program (default)       Override
  ─────────────────    ─────────────────────   ──────────────
  compress-pdf         gs / gswin64c           --gs
  to-txt               pdftotext               --pdftotext
  convert-image        convert / magick        --magick
  resize-image         convert / magick        --magick

ENVIRONMENT VARIABLES:
  FILEPROC_SERVER       Server address for client subcommands
  FILEPROC_LISTEN       Listen address for `serve`
  FILEPROC_TEMP_DIR     Scratch directory for `serve`
  FILEPROC_LOG_FILE     Append logs to this file
  RUST_LOG              Log filter (overrides -v/-q)
"#;

/// Streaming file-conversion server and client.
#[derive(Parser, Debug)]
#[command(
    name = "fileproc",
    version,
    about = "Compress PDFs, extract text and convert or resize images over the network",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FILEPROC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FILEPROC_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the conversion server.
    Serve(ServeArgs),

    /// Compress a PDF with Ghostscript (/ebook quality).
    CompressPdf(FileArgs),

    /// Extract the text of a PDF.
    ToTxt(FileArgs),

    /// Convert an image to another format.
    ConvertImage {
        #[command(flatten)]
        files: FileArgs,

        /// Target format: jpg, jpeg, png, gif, bmp, tiff, webp.
        #[arg(short, long, default_value = "png")]
        format: String,
    },

    /// Resize an image to exact dimensions.
    ResizeImage {
        #[command(flatten)]
        files: FileArgs,

        /// Target width in pixels (1–10000).
        #[arg(long, default_value_t = 800)]
        width: u32,

        /// Target height in pixels (1–10000).
        #[arg(long, default_value_t = 600)]
        height: u32,

        /// Output format (default: jpg).
        #[arg(short, long)]
        format: Option<String>,
    },
}

#[derive(Args, Debug)]
struct FileArgs {
    /// Local input file.
    input: PathBuf,

    /// Where to save the result. Only written when the call succeeds.
    output: PathBuf,

    /// Server address.
    #[arg(long, env = "FILEPROC_SERVER", default_value = "localhost:50051")]
    server: String,

    /// Upload chunk size in bytes.
    #[arg(long, env = "FILEPROC_CHUNK_SIZE", default_value_t = fileproc::config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Disable progress bar.
    #[arg(long, env = "FILEPROC_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "FILEPROC_LISTEN", default_value = fileproc::config::DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Directory for temporary artifacts (default: system temp dir).
    #[arg(long, env = "FILEPROC_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Response chunk size in bytes.
    #[arg(long, env = "FILEPROC_CHUNK_SIZE", default_value_t = fileproc::config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Largest accepted frame in bytes.
    #[arg(long, env = "FILEPROC_MAX_MESSAGE_BYTES", default_value_t = fileproc::config::DEFAULT_MAX_MESSAGE_BYTES)]
    max_message_bytes: usize,

    /// Kill a converter after this many seconds (default: no limit).
    #[arg(long, env = "FILEPROC_TOOL_TIMEOUT")]
    tool_timeout: Option<u64>,

    /// Seconds in-flight calls may run after a shutdown signal.
    #[arg(long, env = "FILEPROC_SHUTDOWN_GRACE", default_value_t = 10)]
    shutdown_grace: u64,

    /// Also append logs to this file.
    #[arg(long, env = "FILEPROC_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Ghostscript executable.
    #[arg(long, env = "FILEPROC_GS")]
    gs: Option<PathBuf>,

    /// pdftotext executable.
    #[arg(long, env = "FILEPROC_PDFTOTEXT")]
    pdftotext: Option<PathBuf>,

    /// ImageMagick executable.
    #[arg(long, env = "FILEPROC_MAGICK")]
    magick: Option<PathBuf>,

    /// Argument placed before the operation's own ImageMagick arguments
    /// (e.g. `--magick magick --magick-arg convert`). Repeatable.
    #[arg(long = "magick-arg")]
    magick_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Client calls show a progress bar; library INFO logs would only fight
    // with it, so they are hidden unless -v is given.
    let is_server = matches!(cli.command, Command::Serve(_));
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || !is_server {
        "error"
    } else {
        "info"
    };
    let log_file = match &cli.command {
        Command::Serve(args) => args.log_file.clone(),
        _ => None,
    };
    let _log_guard = init_logging(&LoggingConfig {
        level: filter.to_string(),
        log_file,
        ansi: io::stderr().is_terminal(),
    })
    .context("Failed to initialise logging")?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::CompressPdf(files) => {
            run_call(OperationKind::CompressPdf, OperationArgs::default(), files, cli.quiet).await
        }
        Command::ToTxt(files) => {
            run_call(OperationKind::ConvertToText, OperationArgs::default(), files, cli.quiet).await
        }
        Command::ConvertImage { files, format } => {
            run_call(
                OperationKind::ConvertImageFormat,
                OperationArgs::format(format),
                files,
                cli.quiet,
            )
            .await
        }
        Command::ResizeImage {
            files,
            width,
            height,
            format,
        } => {
            let mut args = OperationArgs::resize(i64::from(width), i64::from(height));
            args.format = format;
            run_call(OperationKind::ResizeImage, args, files, cli.quiet).await
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = build_config(&args)?;
    let server = FileProcessorServer::new(config);
    let listener = server.bind().await.context("Failed to start server")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    server
        .serve(listener, shutdown)
        .await
        .context("Server failed")
}

/// Map CLI args to `ServiceConfig`.
fn build_config(args: &ServeArgs) -> Result<ServiceConfig> {
    let mut tools = ToolPaths::default();
    if let Some(ref gs) = args.gs {
        tools.ghostscript = ToolSpec::new(gs);
    }
    if let Some(ref pdftotext) = args.pdftotext {
        tools.pdftotext = ToolSpec::new(pdftotext);
    }
    if let Some(ref magick) = args.magick {
        tools.imagemagick = ToolSpec::new(magick);
    }
    if !args.magick_args.is_empty() {
        tools.imagemagick.leading_args = args.magick_args.iter().map(Into::into).collect();
    }

    let mut builder = ServiceConfig::builder()
        .listen_addr(args.listen)
        .chunk_size(args.chunk_size)
        .max_message_bytes(args.max_message_bytes)
        .shutdown_grace(Duration::from_secs(args.shutdown_grace))
        .tools(tools);
    if let Some(ref dir) = args.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(secs) = args.tool_timeout {
        builder = builder.tool_timeout(Duration::from_secs(secs));
    }
    builder.build().context("Invalid configuration")
}

async fn run_call(
    kind: OperationKind,
    args: OperationArgs,
    files: FileArgs,
    quiet: bool,
) -> Result<()> {
    let show_progress = !quiet && !files.no_progress && io::stderr().is_terminal();

    let mut client = FileProcessorClient::new(&files.server).chunk_size(files.chunk_size);
    if show_progress {
        let cb = CliProgressCallback::new();
        client = client.progress_callback(cb as ProgressCallback);
    }

    let start = Instant::now();
    let result = client.call(kind, &args, &files.input, &files.output).await;

    match result {
        Ok(bytes) => {
            if !quiet {
                let input_size = std::fs::metadata(&files.input).map(|m| m.len()).unwrap_or(0);
                eprintln!(
                    "{}  {}  {}  {}ms  →  {}",
                    green("✔"),
                    kind.method(),
                    dim(&size_change(input_size, bytes)),
                    start.elapsed().as_millis(),
                    bold(&files.output.display().to_string()),
                );
            }
            Ok(())
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}  {}  {}", red("✘"), kind.method(), red(&e.to_string()));
            }
            Err(e).with_context(|| format!("{} failed", kind.method()))
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// `"1.50 KiB → 512 B"` for the summary line.
fn size_change(input: u64, output: u64) -> String {
    format!("{} → {}", HumanBytes(input), HumanBytes(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_change_uses_binary_units() {
        assert_eq!(size_change(1536, 512), "1.50 KiB → 512 B");
        assert_eq!(size_change(10 * 1024 * 1024, 0), "10.00 MiB → 0 B");
    }
}
