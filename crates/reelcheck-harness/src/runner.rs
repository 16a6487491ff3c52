//! Single-step subprocess execution.

use reelcheck_core::{HarnessError, Result, Stage};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::command::ToolCommand;
use crate::env::ExecContext;
use crate::sink::{LogSink, Tail};

/// How long to keep reading output after the child has exited.
const PIPE_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Result of one subprocess step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Stage the step ran in.
    pub stage: Stage,

    /// Exit code (0 = success, -1 = killed by a signal).
    pub exit_code: i32,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Last lines of combined stdout/stderr.
    pub tail: Vec<String>,

    /// Whether the process reported success.
    pub success: bool,
}

impl StepOutput {
    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Runs one external command to completion, streaming its output to a sink.
pub struct StepRunner;

impl StepRunner {
    /// Execute `command` with `extra` arguments appended.
    ///
    /// Blocks until the process exits or the context's timeout expires, in
    /// which case the process is killed and [`HarnessError::TimedOut`] is
    /// returned. A non-zero exit is not an error here; callers decide.
    pub async fn execute(
        stage: Stage,
        command: &ToolCommand,
        extra: &[String],
        ctx: &ExecContext,
        sink: &mut LogSink,
    ) -> Result<StepOutput> {
        let start = Instant::now();
        let command_line = command.display(extra);
        sink.begin(stage, &command_line).await?;
        debug!(stage = %stage, command = %command_line, "Spawning");

        let mut cmd = Command::new(&command.program);
        cmd.args(command.argv(extra))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        ctx.env.apply(&mut cmd);
        if let Some(dir) = &ctx.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            stage,
            program: command.program.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone());
        }
        drop(tx);

        let mut tail = Tail::default();
        let drain = async {
            let status = loop {
                tokio::select! {
                    Some(line) = rx.recv() => {
                        sink.line(stage, &line).await?;
                        tail.push(line);
                    }
                    status = child.wait() => break status?,
                }
            };

            // A background helper may still hold the pipes after the child exits.
            let rest = async {
                while let Some(line) = rx.recv().await {
                    sink.line(stage, &line).await?;
                    tail.push(line);
                }
                Ok::<(), HarnessError>(())
            };
            match tokio::time::timeout(PIPE_CLOSE_GRACE, rest).await {
                Ok(drained) => drained?,
                Err(_) => warn!(
                    stage = %stage,
                    "Output pipes still open after exit, not waiting for them"
                ),
            }
            Ok::<ExitStatus, HarnessError>(status)
        };

        let status = match ctx.timeout {
            Some(limit) => match tokio::time::timeout(limit, drain).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(stage = %stage, secs = limit.as_secs(), "Step timed out, killing");
                    if let Err(e) = child.kill().await {
                        warn!(stage = %stage, error = %e, "Failed to kill timed-out step");
                    }
                    sink.flush().await?;
                    return Err(HarnessError::TimedOut {
                        stage,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => drain.await?,
        };
        sink.flush().await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = status.code().unwrap_or(-1);
        debug!(stage = %stage, exit_code, duration_ms, "Step finished");

        Ok(StepOutput {
            stage,
            exit_code,
            duration_ms,
            tail: tail.into_lines(),
            success: status.success(),
        })
    }
}

/// Forward `reader` line by line, decoding lossily. The pipe is read to
/// EOF even after the receiver is gone, so the writer never sees a closed
/// pipe.
fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => return,
                Ok(_) => {
                    if tx.send(decode_line(&buf)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Subprocess output unreadable, discarding the rest");
                    break;
                }
            }
        }
        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    });
}

/// One captured line without its terminator. Invalid UTF-8 becomes U+FFFD.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::env::ProcessEnv;

    fn ctx(timeout: Option<Duration>) -> ExecContext {
        ExecContext {
            env: ProcessEnv::inherit_path(),
            working_dir: None,
            timeout,
        }
    }

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh", ["-c", script])
    }

    #[test]
    fn test_step_output_passed() {
        let output = StepOutput {
            stage: Stage::Run1,
            exit_code: 0,
            duration_ms: 10,
            tail: vec![],
            success: true,
        };
        assert!(output.passed());
    }

    #[test]
    fn test_step_output_failed() {
        let output = StepOutput {
            stage: Stage::Run1,
            exit_code: 2,
            duration_ms: 10,
            tail: vec!["boom".to_string()],
            success: false,
        };
        assert!(!output.passed());
    }

    #[tokio::test]
    async fn test_execute_captures_both_streams() {
        let mut sink = LogSink::tracing_only();
        let output = StepRunner::execute(
            Stage::Preflight,
            &sh("echo out; echo err 1>&2"),
            &[],
            &ctx(None),
            &mut sink,
        )
        .await
        .expect("execute failed");

        assert!(output.passed());
        assert!(output.tail.contains(&"out".to_string()));
        assert!(output.tail.contains(&"err".to_string()));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let mut sink = LogSink::tracing_only();
        let output = StepRunner::execute(Stage::Run1, &sh("exit 3"), &[], &ctx(None), &mut sink)
            .await
            .expect("execute failed");

        assert!(!output.passed());
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_execute_passes_extra_args() {
        let mut sink = LogSink::tracing_only();
        let command = ToolCommand::new("sh", ["-c", "echo \"$1-$2\"", "sh"]);
        let output = StepRunner::execute(
            Stage::Run1,
            &command,
            &["--seed".to_string(), "42".to_string()],
            &ctx(None),
            &mut sink,
        )
        .await
        .expect("execute failed");

        assert_eq!(output.tail, vec!["--seed-42"]);
    }

    #[tokio::test]
    async fn test_execute_applies_explicit_env() {
        let mut sink = LogSink::tracing_only();
        let mut context = ctx(None);
        context.env.set("REELCHECK_TEST_LEVEL", "verbose");

        let output = StepRunner::execute(
            Stage::Run1,
            &sh("echo \"$REELCHECK_TEST_LEVEL $PYTHONIOENCODING\""),
            &[],
            &context,
            &mut sink,
        )
        .await
        .expect("execute failed");

        assert_eq!(output.tail, vec!["verbose utf-8"]);
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let mut sink = LogSink::tracing_only();
        let err = StepRunner::execute(
            Stage::Run2,
            &sh("sleep 5"),
            &[],
            &ctx(Some(Duration::from_millis(200))),
            &mut sink,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            HarnessError::TimedOut {
                stage: Stage::Run2,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"frame=12\n"), "frame=12");
        assert_eq!(decode_line(b"progress\r\n"), "progress");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"clip \xe9t\xe9.mp4\n"), "clip \u{fffd}t\u{fffd}.mp4");
    }

    #[tokio::test]
    async fn test_execute_survives_invalid_utf8_output() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.log");
        let mut sink = LogSink::create(&log).await.unwrap();
        let script = "printf 'clip \\351t\\351.mp4\\n'; sleep 0.3; \
                      i=0; while [ $i -lt 200 ]; do echo \"line $i\"; i=$((i+1)); done; exit 0";

        let output = StepRunner::execute(Stage::Run1, &sh(script), &[], &ctx(None), &mut sink)
            .await
            .expect("execute failed");

        assert!(output.passed(), "exit code {}", output.exit_code);
        assert_eq!(output.tail.last().map(String::as_str), Some("line 199"));

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("clip \u{fffd}t\u{fffd}.mp4\n"));
        assert!(content.contains("line 199\n"));
    }

    #[tokio::test]
    async fn test_execute_returns_when_helper_keeps_pipe_open() {
        let mut sink = LogSink::tracing_only();
        let command = sh("(sleep 10) & echo started; exit 0");
        let context = ctx(None);
        let step = StepRunner::execute(Stage::Run1, &command, &[], &context, &mut sink);
        let output = tokio::time::timeout(Duration::from_secs(6), step)
            .await
            .expect("step waited on the helper's pipe")
            .expect("execute failed");

        assert!(output.passed());
        assert_eq!(output.tail, vec!["started"]);
    }

    #[tokio::test]
    async fn test_execute_missing_program() {
        let mut sink = LogSink::tracing_only();
        let command = ToolCommand::new("/nonexistent/reelcheck-tool", Vec::<String>::new());
        let err = StepRunner::execute(Stage::Preflight, &command, &[], &ctx(None), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Spawn { .. }));
    }
}
