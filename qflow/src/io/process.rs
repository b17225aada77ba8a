//! Helpers for running collaborator commands with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

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

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// Human-readable explanation of a failed run, preferring stderr.
    pub fn diagnostic(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            self.stdout_text()
        } else {
            stderr
        };
        if self.timed_out {
            return format!("timed out: {detail}");
        }
        match self.status.code() {
            Some(code) if detail.is_empty() => format!("exit status {code}"),
            Some(code) => format!("exit status {code}: {detail}"),
            None => format!("terminated by signal: {detail}"),
        }
    }
}

/// Build a `Command` from an argv array.
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr kept in memory; bytes beyond it are drained and counted.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning collaborator");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    // Fed from its own thread so a child that never reads its input cannot
    // hold us past the timeout.
    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || {
                // A child that exits without reading stdin is not an error
                // here; its exit status tells the story.
                if let Err(e) = child_stdin.write_all(&input) {
                    warn!(err = %e, "collaborator closed stdin early");
                }
            }))
        }
        None => None,
    };

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    if let Some(handle) = stdin_handle
        && handle.join().is_err()
    {
        return Err(anyhow!("stdin writer thread panicked"));
    }
    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

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

/// Run a command on the blocking pool so async tasks keep their worker threads.
pub async fn run_command_async(
    argv: Vec<String>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    tokio::task::spawn_blocking(move || {
        let cmd = command_from_argv(&argv)?;
        run_command_with_timeout(cmd, stdin.as_deref(), timeout, output_limit_bytes)
    })
    .await
    .context("command task panicked")?
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
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

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_stdout_from_stdin() {
        let cmd = command_from_argv(&sh("cat")).expect("cmd");
        let output =
            run_command_with_timeout(cmd, Some(b"hello"), Duration::from_secs(5), 1000)
                .expect("run");
        assert!(output.success());
        assert_eq!(output.stdout_text(), "hello");
    }

    #[test]
    fn truncates_beyond_limit() {
        let cmd = command_from_argv(&sh("printf 'abcdefghij'")).expect("cmd");
        let output = run_command_with_timeout(cmd, None, Duration::from_secs(5), 4).expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let cmd = command_from_argv(&sh("echo out; echo bad query >&2; exit 3")).expect("cmd");
        let output = run_command_with_timeout(cmd, None, Duration::from_secs(5), 1000).expect("run");
        assert!(!output.success());
        assert_eq!(output.diagnostic(), "exit status 3: bad query");
    }

    #[test]
    fn kills_on_timeout() {
        let cmd = command_from_argv(&sh("sleep 5")).expect("cmd");
        let output =
            run_command_with_timeout(cmd, None, Duration::from_millis(100), 1000).expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn timeout_holds_when_child_ignores_large_stdin() {
        let cmd = command_from_argv(&sh("exec sleep 5")).expect("cmd");
        let input = vec![b'x'; 512 * 1024];
        let started = std::time::Instant::now();
        let output =
            run_command_with_timeout(cmd, Some(&input), Duration::from_millis(200), 1000)
                .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(command_from_argv(&[]).is_err());
    }

    #[tokio::test]
    async fn async_wrapper_runs_on_blocking_pool() {
        let output = run_command_async(sh("echo hi"), None, Duration::from_secs(5), 1000)
            .await
            .expect("run");
        assert_eq!(output.stdout_text(), "hi");
    }
}
