//! Helpers for running child processes with timeouts and bounded output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

/// How long output readers may keep draining once the command is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Last non-empty line of stdout, lossily decoded.
    pub fn last_stdout_line(&self) -> Option<String> {
        last_line(&self.stdout)
    }

    /// Last non-empty line of stderr, lossily decoded.
    pub fn last_stderr_line(&self) -> Option<String> {
        last_line(&self.stderr)
    }
}

fn last_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Stdin is fed and both output pipes are drained on their own tasks while the
/// child runs. `output_limit_bytes` bounds what is kept in memory; bytes past the
/// limit are still read and discarded.
///
/// On unix the child leads its own process group. On timeout the whole group is
/// killed and `timed_out` is set. Readers get [`READER_GRACE`] past the unit's
/// deadline (or past the kill) to reach EOF; a descendant that still holds a
/// pipe after that loses its output instead of stalling the caller.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub async fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(tokio::spawn(async move {
                // A child that exits without reading stdin closes the pipe; that is not an error.
                if let Err(e) = child_stdin.write_all(&input).await {
                    debug!(err = %e, "stdin closed before payload was fully written");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = tokio::spawn(read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = tokio::spawn(read_stream_limited(stderr, output_limit_bytes));

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let status = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(status) => status.context("wait for command")?,
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_group(&child);
            child.kill().await.context("kill command")?;
            child.wait().await.context("wait command after kill")?
        }
    };

    if let Some(handle) = stdin_handle {
        handle.abort();
    }
    let drain_until = if timed_out {
        Instant::now() + READER_GRACE
    } else {
        deadline.max(Instant::now()) + READER_GRACE
    };
    let (stdout, stdout_truncated) = join_output(stdout_handle, drain_until)
        .await
        .context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle, drain_until)
        .await
        .context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

async fn join_output(
    handle: JoinHandle<Result<(Vec<u8>, usize)>>,
    until: Instant,
) -> Result<(Vec<u8>, usize)> {
    let abort = handle.abort_handle();
    match tokio::time::timeout_at(until, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(anyhow!("output reader task failed")),
        Err(_) => {
            abort.abort();
            warn!("output pipe still open after command exited, dropping its output");
            Ok((Vec::new(), 0))
        }
    }
}

/// SIGKILL every process in the child's group.
#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_process_group(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // Negative pid addresses the process group the child leads.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(err = %std::io::Error::last_os_error(), "kill process group failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await.context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_stdout_and_stdin() {
        let output = run_command_with_timeout(
            sh("cat; echo done"),
            Some(b"payload\n".to_vec()),
            Duration::from_secs(10),
            1024,
        )
        .await
        .expect("run");
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "payload\ndone\n");
        assert_eq!(output.last_stdout_line().as_deref(), Some("done"));
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn truncates_output_beyond_limit() {
        let output = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .await
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[tokio::test]
    async fn kills_child_on_timeout() {
        let output = run_command_with_timeout(
            sh("exec sleep 5"),
            None,
            Duration::from_millis(100),
            1024,
        )
        .await
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[tokio::test]
    async fn timeout_kills_descendants_holding_the_pipes() {
        let started = std::time::Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 5; echo late"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .await
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
        assert!(output.last_stdout_line().is_none());
    }

    #[tokio::test]
    async fn background_writer_does_not_hold_a_finished_command() {
        let started = std::time::Instant::now();
        let output = run_command_with_timeout(
            sh("(sleep 30; echo late) & echo done"),
            None,
            Duration::from_millis(300),
            1024,
        )
        .await
        .expect("run");
        assert!(!output.timed_out);
        assert!(output.status.success());
        assert!(started.elapsed() < Duration::from_secs(10), "{:?}", started.elapsed());
    }
}
