pub mod progress;

use std::ffi::OsStr;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::errors::{AppError, Result};
pub use progress::{FfmpegProgress, LineParser, NoProgress, PercentProgress};

/// Captured output of a tool that exited with status 0.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs external executables with both pipes drained concurrently.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    tag: &'static str,
}

impl ToolRunner {
    /// `tag` prefixes log lines, e.g. `"FETCH"`.
    pub fn new(tag: &'static str) -> Self {
        Self { tag }
    }

    pub async fn run<S: AsRef<OsStr>>(
        &self,
        program: &OsStr,
        args: &[S],
        cancel: &CancellationToken,
    ) -> Result<ToolOutput> {
        self.run_with_progress(program, args, NoProgress, |_| {}, cancel).await
    }

    /// Every stdout and stderr line (split on `\n` or `\r`) is offered to
    /// `parser`; recognised fractions go to `on_progress`. Cancelling kills
    /// the child and returns `AppError::Cancelled`.
    pub async fn run_with_progress<S, P, F>(
        &self,
        program: &OsStr,
        args: &[S],
        mut parser: P,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput>
    where
        S: AsRef<OsStr>,
        P: LineParser,
        F: FnMut(f32) + Send,
    {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        log::debug!("🚀 [{}] Running {:?} with {} args", self.tag, program, args.len());

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| AppError::ToolExecution {
            exit_code: None,
            stderr: format!("Failed to start {}: {}", program.to_string_lossy(), e),
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<(Stream, String)>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, Stream::Stderr, tx.clone()));
        }
        // The channel closes once both readers hit EOF.
        drop(tx);

        let mut stdout_lines: Vec<String> = Vec::new();
        let mut stderr_lines: Vec<String> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("🛑 [{}] Cancel requested, killing {:?}", self.tag, program);
                    let _ = child.kill().await;
                    return Err(AppError::Cancelled);
                }
                message = rx.recv() => {
                    let Some((stream, line)) = message else { break };
                    if let Some(fraction) = parser.parse_line(&line) {
                        on_progress(fraction);
                    }
                    match stream {
                        Stream::Stdout => stdout_lines.push(line),
                        Stream::Stderr => stderr_lines.push(line),
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(AppError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stdout = stdout_lines.join("\n");
        let stderr = stderr_lines.join("\n");

        match status.code() {
            Some(0) => Ok(ToolOutput {
                stdout,
                stderr,
                exit_code: 0,
            }),
            code => {
                let message = stderr.trim();
                let message = if message.is_empty() {
                    match code {
                        Some(code) => format!("{} exited with status {}", program.to_string_lossy(), code),
                        None => format!("{} was terminated by a signal", program.to_string_lossy()),
                    }
                } else {
                    message.to_string()
                };
                log::error!("❌ [{}] {:?} failed ({:?}): {}", self.tag, program, code, message);
                Err(AppError::ToolExecution {
                    exit_code: code,
                    stderr: message,
                })
            }
        }
    }
}

/// Reads `reader` to EOF, forwarding each non-empty line. Both `\n` and `\r`
/// terminate a line so carriage-return progress updates arrive one by one.
async fn pump_lines<R>(mut reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..read] {
            if byte == b'\n' || byte == b'\r' {
                flush_line(&mut pending, stream, &tx);
            } else {
                pending.push(byte);
            }
        }
    }
    flush_line(&mut pending, stream, &tx);
}

fn flush_line(pending: &mut Vec<u8>, stream: Stream, tx: &mpsc::UnboundedSender<(Stream, String)>) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    let _ = tx.send((stream, line));
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    fn sh() -> &'static OsStr {
        OsStr::new("sh")
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let runner = ToolRunner::new("TEST");
        let output = runner
            .run(sh(), &["-c", "echo hello; echo world"], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello\nworld");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr() {
        let runner = ToolRunner::new("TEST");
        let err = runner
            .run(sh(), &["-c", "echo 'ERROR: unavailable' >&2; exit 3"], &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AppError::ToolExecution { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "ERROR: unavailable");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_executable_is_a_tool_failure() {
        let runner = ToolRunner::new("TEST");
        let err = runner
            .run(OsStr::new("/nonexistent/tool"), &["--version"], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ToolExecution { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn large_output_on_both_pipes_does_not_deadlock() {
        let runner = ToolRunner::new("TEST");
        let script = "i=0; while [ $i -lt 20000 ]; do echo \"out line $i\"; echo \"err line $i\" >&2; i=$((i+1)); done";
        let output = tokio::time::timeout(
            Duration::from_secs(30),
            runner.run(sh(), &["-c", script], &CancellationToken::new()),
        )
        .await
        .expect("runner stalled")
        .unwrap();
        assert_eq!(output.stdout.lines().count(), 20000);
        assert_eq!(output.stderr.lines().count(), 20000);
    }

    #[tokio::test]
    async fn carriage_return_progress_is_reported() {
        let runner = ToolRunner::new("TEST");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        runner
            .run_with_progress(
                sh(),
                &["-c", "printf '[download]  10.0%%\\r[download]  55.5%%\\r[download] 100%%\\n' >&2"],
                PercentProgress,
                move |p| sink.lock().unwrap().push(p),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], 1.0);
    }

    #[tokio::test]
    async fn cancellation_kills_blocked_child_quickly() {
        let runner = ToolRunner::new("TEST");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = runner.run(sh(), &["-c", "sleep 30"], &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
