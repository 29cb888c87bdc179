//! Streaming execution of the external tool
//!
//! [`spawn`] starts the tool and returns an [`OutputLines`] reader that yields
//! standard output line by line as the child writes it, after discarding the
//! banner preamble. `\r`, `\n` and `\r\n` all end a line, so progress bars
//! redrawn in place are reported one update at a time. The error stream is drained concurrently so the child
//! never stalls on a full pipe, and is inspected once standard output ends:
//! `dfu-util` exits with status 0 even when it reports an error.
//!
//! The child is owned by the reader. Dropping the reader before the end of
//! output kills the child and reaps it in the background.

use common::{Error, Result};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Banner/copyright lines printed before any data
pub const DEFAULT_PREAMBLE_LINES: usize = 7;

/// How to treat a non-empty error stream from a successful exit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrPolicy {
    /// Raise an execution fault
    #[default]
    Fail,
    /// Log a warning and treat the run as successful
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    pub preamble_lines: usize,
    pub stderr_policy: StderrPolicy,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            preamble_lines: DEFAULT_PREAMBLE_LINES,
            stderr_policy: StderrPolicy::default(),
        }
    }
}

/// Incremental reader over the standard output of a running tool
pub struct OutputLines {
    program: String,
    child: Option<Child>,
    stdout: BufReader<ChildStdout>,
    /// Last line ended with `\r`; a leading `\n` belongs to it
    after_cr: bool,
    stderr: Option<JoinHandle<std::io::Result<String>>>,
    skip: usize,
    policy: StderrPolicy,
    finished: bool,
}

/// Spawn `program` with `args`
///
/// Must be called within a Tokio runtime.
pub fn spawn(program: &str, args: &[String], options: ExecOptions) -> Result<OutputLines> {
    debug!("Spawning {} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Execution {
            status: None,
            stderr: format!("Failed to launch {}: {}", program, e),
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Channel("child stdout not captured".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Channel("child stderr not captured".to_string()))?;

    let stderr = tokio::spawn(async move {
        let mut captured = String::new();
        stderr.read_to_string(&mut captured).await?;
        Ok(captured)
    });

    Ok(OutputLines {
        program: program.to_string(),
        child: Some(child),
        stdout: BufReader::new(stdout),
        after_cr: false,
        stderr: Some(stderr),
        skip: options.preamble_lines,
        policy: options.stderr_policy,
        finished: false,
    })
}

impl OutputLines {
    /// Next data line, or `None` once the tool has exited cleanly
    ///
    /// At end of output the child is reaped and its exit status and error
    /// stream are checked; a failure is returned in place of `None`.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            match self.read_line().await {
                Ok(Some(line)) if self.skip > 0 => {
                    self.skip -= 1;
                    debug!("Skipping preamble: {}", line);
                }
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) => {
                    self.finished = true;
                    self.finish().await?;
                    return Ok(None);
                }
                Err(e) => {
                    self.finished = true;
                    return Err(e.into());
                }
            }
        }
    }

    /// Read all remaining data lines
    pub async fn collect(mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Turn the reader into a stream; the stream ends after the first error
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> + Send + 'static {
        futures::stream::unfold(Some(self), |state| async move {
            let mut lines = state?;
            match lines.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(lines))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Read up to the next `\r` or `\n`; `None` at end of output
    async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = Vec::new();
        loop {
            let available = self.stdout.fill_buf().await?;
            if available.is_empty() {
                return Ok((!line.is_empty()).then(|| decode(line)));
            }

            let mut start = 0;
            if self.after_cr {
                self.after_cr = false;
                if available[0] == b'\n' {
                    start = 1;
                }
            }

            match available[start..]
                .iter()
                .position(|&b| b == b'\n' || b == b'\r')
            {
                Some(offset) => {
                    let end = start + offset;
                    line.extend_from_slice(&available[start..end]);
                    self.after_cr = available[end] == b'\r';
                    self.stdout.consume(end + 1);
                    return Ok(Some(decode(line)));
                }
                None => {
                    line.extend_from_slice(&available[start..]);
                    let consumed = available.len();
                    self.stdout.consume(consumed);
                }
            }
        }
    }

    async fn finish(&mut self) -> Result<()> {
        let status = match self.child.take() {
            Some(mut child) => child.wait().await?,
            None => return Ok(()),
        };

        let stderr = match self.stderr.take() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Channel(format!("stderr reader failed: {}", e)))??,
            None => String::new(),
        };
        let stderr = stderr.trim();

        if !status.success() {
            return Err(Error::Execution {
                status: status.code(),
                stderr: if stderr.is_empty() {
                    format!("{} exited with {}", self.program, status)
                } else {
                    stderr.to_string()
                },
            });
        }

        if !stderr.is_empty() {
            match self.policy {
                StderrPolicy::Fail => {
                    return Err(Error::Execution {
                        status: status.code(),
                        stderr: stderr.to_string(),
                    });
                }
                StderrPolicy::Log => {
                    warn!("{} reported on stderr: {}", self.program, stderr);
                }
            }
        }

        debug!("{} finished with {}", self.program, status);
        Ok(())
    }
}

fn decode(line: Vec<u8>) -> String {
    String::from_utf8(line).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

impl Drop for OutputLines {
    fn drop(&mut self) {
        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }

        let Some(mut child) = self.child.take() else {
            return;
        };

        debug!("Output of {} abandoned, terminating child", self.program);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                // kill() waits for the exit, which reaps the child
                runtime.spawn(async move {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to terminate abandoned child: {}", e);
                    }
                });
            }
            Err(_) => {
                let _ = child.start_kill();
            }
        }
    }
}
