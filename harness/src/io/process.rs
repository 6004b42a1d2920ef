//! Helpers for running child processes with timeouts and bounded output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

/// How long output is still drained after the child exits. Grandchildren that
/// inherited the pipes can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

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
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).to_string();
        if self.stdout_truncated > 0 {
            text.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        text
    }

    pub fn stderr_lossy(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).to_string();
        if self.stderr_truncated > 0 {
            text.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        text
    }
}

/// Run a command, optionally feeding stdin and enforcing a timeout.
///
/// stdout/stderr are drained by separate tasks while the child runs, so a
/// chatty child never blocks on a full pipe. `output_limit_bytes` bounds what
/// is kept in memory; the rest is discarded but still drained. On timeout the
/// child is killed and whatever output arrived is returned. Once the child has
/// exited, readers get [`DRAIN_GRACE`] to finish, so leftover grandchildren
/// holding the pipes cannot stall the caller.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs()), output_limit_bytes))]
pub async fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdin_task = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_vec();
            Some(tokio::spawn(async move {
                pipe.write_all(&input).await?;
                pipe.shutdown().await
            }))
        }
        (Some(_), None) => return Err(anyhow!("stdin was not piped")),
        _ => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let stdout_handle = tokio::spawn(read_stream_limited(
        stdout,
        output_limit_bytes,
        stop_rx.clone(),
    ));
    let stderr_handle = tokio::spawn(read_stream_limited(stderr, output_limit_bytes, stop_rx));

    let mut timed_out = false;
    let status = match timeout {
        Some(limit) => {
            let waited = tokio::time::timeout(limit, child.wait()).await;
            match waited {
                Ok(status) => status.context("wait for command")?,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
                    timed_out = true;
                    child.kill().await.context("kill command")?;
                    child.wait().await.context("wait command after kill")?
                }
            }
        }
        None => child.wait().await.context("wait for command")?,
    };

    if let Some(task) = stdin_task {
        if task.is_finished() {
            // A child that exits without reading stdin closes the pipe; that is not our failure.
            if let Ok(Err(err)) = task.await {
                debug!(err = %err, "stdin write ended early");
            }
        } else {
            debug!("child exited before consuming stdin");
            task.abort();
        }
    }

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(DRAIN_GRACE).await;
        let _ = stop_tx.send(true);
    });
    let (stdout, stdout_truncated) = join_output(stdout_handle).await.context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).await.context("join stderr")?;
    stopper.abort();

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

async fn join_output(handle: JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader task panicked")),
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
    mut stop: watch::Receiver<bool>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = tokio::select! {
            read = reader.read(&mut chunk) => read.context("read output")?,
            _ = stop.wait_for(|stop| *stop) => {
                warn!("pipe still open after child exit, stopped reading");
                break;
            }
        };
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

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        let out = run_command(sh("echo out; echo err >&2; exit 3"), None, None, 1024)
            .await
            .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&out.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "err\n");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn feeds_stdin() {
        let out = run_command(sh("cat"), Some(b"hello prompt".as_slice()), None, 1024)
            .await
            .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout, b"hello prompt");
    }

    #[tokio::test]
    async fn truncates_output_beyond_limit() {
        let out = run_command(sh("printf 'abcdef'"), None, None, 4)
            .await
            .expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 2);
        assert!(out.stdout_lossy().contains("[stdout truncated 2 bytes]"));
    }

    #[tokio::test]
    async fn kills_on_timeout() {
        let out = run_command(
            sh("exec sleep 5"),
            None,
            Some(Duration::from_millis(100)),
            1024,
        )
        .await
        .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_is_not_held_up_by_grandchildren() {
        let started = std::time::Instant::now();
        let out = run_command(
            sh("echo before; sleep 4; echo after"),
            None,
            Some(Duration::from_millis(100)),
            1024,
        )
        .await
        .expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "before\n");
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let err = run_command(
            Command::new("definitely-not-a-real-binary-xyz"),
            None,
            None,
            16,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
