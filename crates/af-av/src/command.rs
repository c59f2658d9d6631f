//! Builder for running external tools.
//!
//! Two ways to run a tool:
//!
//! - [`ToolCommand::execute`] captures stdout and stderr and treats a
//!   non-zero exit as an error. Used for short helper invocations such as
//!   version checks.
//! - [`ToolCommand::run`] forwards every output line to `tracing` as it
//!   arrives and reports the exit status instead of failing on it. Used for
//!   the packager, whose failure is a result the caller acts on.
//!
//! In both cases a process that cannot be started is an [`Error::Tool`], and
//! the child is killed when the run is cancelled or times out.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use af_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of trailing stderr lines kept in a [`ToolRun`].
pub const CAPTURED_STDERR_LINES: usize = 200;

/// Output captured from [`ToolCommand::execute`].
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// Result of [`ToolCommand::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRun {
    /// True iff the process exited with status zero.
    pub success: bool,
    /// Exit code; `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// The last [`CAPTURED_STDERR_LINES`] lines written to stderr.
    pub stderr: Vec<String>,
}

/// A builder for external tool invocations.
///
/// ```no_run
/// use af_av::ToolCommand;
/// use std::path::PathBuf;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> af_core::Result<()> {
/// let run = ToolCommand::new(PathBuf::from("packager"))
///     .arg("--version")
///     .run(&CancellationToken::new())
///     .await?;
/// assert!(run.success);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            current_dir: None,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Run the tool from `dir`.
    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// File name of the program, used as the tool name in logs and errors.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn(&self) -> Result<Child> {
        tracing::debug!(
            tool = %self.program_name(),
            args = ?self.args,
            "Starting tool"
        );
        self.command()
            .spawn()
            .map_err(|e| Error::tool(self.program_name(), format!("failed to spawn: {e}")))
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// [`Error::Tool`] if the process cannot be spawned, times out, or exits
    /// with a non-zero status (the message includes stderr).
    pub async fn execute(&self) -> Result<ToolOutput> {
        let program_name = self.program_name();
        let child = self.spawn()?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                if !output.status.success() {
                    return Err(Error::tool(
                        program_name,
                        format!(
                            "exited with status {}: {}",
                            output.status,
                            tool_output.stderr.trim()
                        ),
                    ));
                }
                Ok(tool_output)
            }
            Ok(Err(e)) => Err(Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            // The child is dropped with the timed-out future; kill_on_drop
            // reaps it.
            Err(_elapsed) => Err(Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Run the command, forwarding its output line by line to `tracing`.
    ///
    /// A non-zero exit is logged and returned as `success == false`.
    ///
    /// # Errors
    ///
    /// - [`Error::Tool`] if the process cannot be spawned or times out.
    /// - [`Error::Cancelled`] if `cancel` fires first; the child is killed.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ToolRun> {
        let tool = self.program_name();
        let mut child = self.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let drive = async {
            let (_, stderr, status) = tokio::join!(
                forward_lines(stdout, &tool, "stdout", 0),
                forward_lines(stderr, &tool, "stderr", CAPTURED_STDERR_LINES),
                child.wait(),
            );
            (status, stderr)
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            finished = tokio::time::timeout(self.timeout, drive) => Some(finished),
        };

        let (status, stderr) = match outcome {
            None => {
                kill(&mut child, &tool).await;
                return Err(Error::Cancelled);
            }
            Some(Err(_elapsed)) => {
                kill(&mut child, &tool).await;
                return Err(Error::tool(tool, format!("timed out after {:?}", self.timeout)));
            }
            Some(Ok(finished)) => finished,
        };
        let status = status
            .map_err(|e| Error::tool(&tool, format!("I/O error waiting for process: {e}")))?;

        let run = ToolRun {
            success: status.success(),
            exit_code: status.code(),
            stderr: stderr.into(),
        };
        if run.success {
            tracing::debug!(tool = %tool, "Tool finished");
        } else {
            match run.exit_code {
                Some(code) => tracing::error!(tool = %tool, exit_code = code, "Tool exited with code {code}"),
                None => tracing::error!(tool = %tool, "Tool terminated by signal"),
            }
        }
        Ok(run)
    }

    /// Run the command and copy its stdout into `writer` while stderr is
    /// forwarded to `tracing`. Returns the bytes copied.
    ///
    /// Unlike [`run`](Self::run), a non-zero exit is an [`Error::Tool`]: the
    /// bytes written are incomplete and must not be used.
    pub async fn run_piped(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let tool = self.program_name();
        let mut child = self.spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::tool(&tool, "stdout was not captured"))?;
        let stderr = child.stderr.take();

        let drive = async {
            let (copied, stderr, status) = tokio::join!(
                // Owns stdout so a failed copy closes the pipe and the
                // child cannot block on a full stdout.
                async move {
                    let n = af_source::copy_cancellable(&mut stdout, &mut *writer, None, cancel)
                        .await?;
                    writer.flush().await?;
                    Ok::<_, Error>(n)
                },
                forward_lines(stderr, &tool, "stderr", CAPTURED_STDERR_LINES),
                child.wait(),
            );
            (copied, stderr, status)
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            finished = tokio::time::timeout(self.timeout, drive) => Some(finished),
        };

        let (copied, stderr, status) = match outcome {
            None => {
                kill(&mut child, &tool).await;
                return Err(Error::Cancelled);
            }
            Some(Err(_elapsed)) => {
                kill(&mut child, &tool).await;
                return Err(Error::tool(tool, format!("timed out after {:?}", self.timeout)));
            }
            Some(Ok(finished)) => finished,
        };

        let status = status
            .map_err(|e| Error::tool(&tool, format!("I/O error waiting for process: {e}")))?;
        if !status.success() {
            let last = stderr.back().map(String::as_str).unwrap_or("");
            return Err(Error::tool(
                tool,
                format!("exited with status {status}: {last}"),
            ));
        }
        copied
    }
}

async fn kill(child: &mut Child, tool: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(tool, error = %e, "Failed to kill tool process");
    }
}

/// Log every line of `reader` under `tool`, keeping the last `keep` lines.
async fn forward_lines<R>(
    reader: Option<R>,
    tool: &str,
    stream: &'static str,
    keep: usize,
) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut kept = VecDeque::with_capacity(keep.min(64));
    let Some(reader) = reader else {
        return kept;
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                if line.is_empty() {
                    continue;
                }
                tracing::info!(tool, stream, "{line}");
                if keep > 0 {
                    if kept.len() == keep {
                        kept.pop_front();
                    }
                    kept.push_back(line.to_string());
                }
            }
            Err(e) => {
                tracing::warn!(tool, stream, error = %e, "Failed to read tool output");
                break;
            }
        }
    }
    kept
}
