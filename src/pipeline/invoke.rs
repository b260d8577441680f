//! External converter invocation.
//!
//! Commands are always an argument list handed straight to the OS — never a
//! shell string — so file names and caller-supplied arguments cannot inject
//! anything. Standard output and standard error are attached to the same OS
//! pipe, which keeps the converter's messages in the order it emitted them.
//!
//! A nonzero exit status is a normal [`CommandResult`]; only a failure to
//! start the process at all is an error of the invoker itself.
//!
//! On Unix each converter runs in its own process group. A timeout or an
//! aborted call kills the whole group, so helpers the converter forked cannot
//! outlive it or hold the output pipe open.

use crate::error::ServiceError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A fully materialised converter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Human-readable tool name used in error messages ("Ghostscript", …).
    pub tool: &'static str,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// The artifact this invocation is expected to produce.
    pub output: PathBuf,
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {:?}", arg)?;
        }
        Ok(())
    }
}

/// Outcome of one converter run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit status; `-1` when the process was terminated by a signal.
    pub status: i32,
    /// Standard output and standard error, merged.
    pub output: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs converter commands. The pipeline only talks to this trait.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> Result<CommandResult, ServiceError>;
}

/// Spawns real OS processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolRunner for ProcessInvoker {
    async fn run(&self, command: &ToolCommand) -> Result<CommandResult, ServiceError> {
        let launch_err = |source: std::io::Error| ServiceError::ToolLaunch {
            program: command.program.display().to_string(),
            source,
        };

        let (mut reader, writer) = std::io::pipe().map_err(launch_err)?;
        let writer_for_stderr = writer.try_clone().map_err(launch_err)?;

        let mut child = {
            let mut cmd = tokio::process::Command::new(&command.program);
            cmd.args(&command.args)
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(writer_for_stderr)
                .kill_on_drop(true);
            #[cfg(unix)]
            cmd.process_group(0);
            cmd.spawn().map_err(launch_err)?
            // `cmd` drops here and closes our copies of the pipe's write end,
            // so the reader sees EOF once the child exits.
        };

        let start = Instant::now();
        let collector = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        });

        let mut group = ProcessGroup { pid: child.id() };

        // The output is complete only once every holder of the pipe is gone,
        // so the timeout covers the reader as well as the exit status.
        let finished = async {
            let status = child.wait().await;
            (status, collector.await)
        };
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, finished).await.ok(),
            None => Some(finished.await),
        };
        let Some((status, output)) = outcome else {
            let limit = self.timeout.unwrap_or_default();
            warn!(
                "{} exceeded {}s, killing process group {:?}",
                command.tool,
                limit.as_secs(),
                group.pid
            );
            group.kill();
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", command.tool, e);
                }
            }
            return Err(ServiceError::ToolTimedOut {
                tool: command.tool.to_string(),
                secs: limit.as_secs(),
            });
        };
        group.disarm();

        let status = status
            .map_err(|e| ServiceError::io(format!("Failed waiting for {}", command.tool), e))?;
        let output = output
            .map_err(|e| ServiceError::Internal(format!("output collector panicked: {e}")))?
            .map_err(|e| ServiceError::io(format!("Failed reading {} output", command.tool), e))?;

        let result = CommandResult {
            status: status.code().unwrap_or(-1),
            output: String::from_utf8_lossy(&output).into_owned(),
        };
        debug!(
            "{} exited with {} after {}ms ({} bytes of output)",
            command.tool,
            result.status,
            start.elapsed().as_millis(),
            result.output.len()
        );
        Ok(result)
    }
}

/// Kills the converter's process group when dropped while still armed.
struct ProcessGroup {
    pid: Option<u32>,
}

impl ProcessGroup {
    fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_group(pid);
        }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

// Elsewhere only the direct child is killed, through `kill_on_drop`.
#[cfg(not(unix))]
fn kill_group(_pid: u32) {}
