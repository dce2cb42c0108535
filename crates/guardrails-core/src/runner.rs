use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

pub const MAX_ERROR_CHARS: usize = 500;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCommand {
    argv: Vec<String>,
}

impl HookCommand {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    pub fn id(&self) -> String {
        self.argv.join(" ")
    }

    /// A lone argument with whitespace in it is a shell command line.
    fn build(&self) -> Option<Command> {
        match self.argv.as_slice() {
            [] => None,
            [line] if line.chars().any(char::is_whitespace) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                Some(cmd)
            }
            [program, args @ ..] => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                Some(cmd)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    Signaled(i32),
    TimedOut(Duration),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct HookRun {
    pub status: RunStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl HookRun {
    fn error(message: String, started: Instant) -> Self {
        Self {
            status: RunStatus::Error(message),
            stdout: Vec::new(),
            stderr: Vec::new(),
            elapsed: started.elapsed(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Exited(0)
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Exited(code) => code,
            _ => 1,
        }
    }

    pub fn failure_reason(&self) -> Option<String> {
        let reason = match &self.status {
            RunStatus::Exited(0) => return None,
            RunStatus::Exited(code) => with_tail(format!("exit code {code}"), &self.stderr),
            RunStatus::Signaled(signal) => {
                with_tail(format!("killed by signal {signal}"), &self.stderr)
            }
            RunStatus::TimedOut(limit) => format!("timed out after {}s", limit.as_secs_f64()),
            RunStatus::Error(message) => message.clone(),
        };
        Some(truncate_chars(&reason, MAX_ERROR_CHARS))
    }
}

fn with_tail(head: String, stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return head;
    }
    let skip = text.chars().count().saturating_sub(MAX_ERROR_CHARS);
    let tail: String = text.chars().skip(skip).collect();
    format!("{head}: {tail}")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamSource {
    Stdout,
    Stderr,
}

#[derive(Debug)]
enum StreamEvent {
    Chunk { source: StreamSource, bytes: Vec<u8> },
    Closed,
}

/// Runs `cmd` in its own process group, feeding it `stdin` and capturing both
/// output streams. Once `timeout` passes the whole group is killed.
pub fn run_hook(cmd: &HookCommand, stdin: Option<&[u8]>, timeout: Duration) -> HookRun {
    let started = Instant::now();
    let Some(mut command) = cmd.build() else {
        return HookRun::error("failed to start: empty command".to_string(), started);
    };
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return HookRun::error(format!("failed to start: {err}"), started),
    };

    let writer = match (child.stdin.take(), stdin) {
        (Some(mut pipe), Some(data)) => {
            let data = data.to_vec();
            // A child that never reads its stdin closes the pipe; ignore EPIPE.
            Some(thread::spawn(move || {
                let _ = pipe.write_all(&data);
            }))
        }
        _ => None,
    };

    let (tx, rx) = mpsc::channel::<StreamEvent>();
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(spawn_stream_reader(out, StreamSource::Stdout, tx.clone()));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(spawn_stream_reader(err, StreamSource::Stderr, tx.clone()));
    }
    drop(tx);

    let mut open_streams = readers.len();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut status: Option<RunStatus> = None;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(StreamEvent::Chunk { source, bytes }) => match source {
                StreamSource::Stdout => stdout.extend_from_slice(&bytes),
                StreamSource::Stderr => stderr.extend_from_slice(&bytes),
            },
            Ok(StreamEvent::Closed) => open_streams = open_streams.saturating_sub(1),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => open_streams = 0,
        }

        let overdue = started.elapsed() >= timeout;
        if status.is_none() {
            match child.try_wait() {
                Ok(Some(exit)) => status = Some(exit_status(exit)),
                Ok(None) if overdue => {
                    kill_group(&mut child);
                    let _ = child.wait();
                    status = Some(RunStatus::TimedOut(timeout));
                }
                Ok(None) => {}
                Err(err) => {
                    kill_group(&mut child);
                    let _ = child.wait();
                    status = Some(RunStatus::Error(format!("failed waiting for command: {err}")));
                }
            }
        } else if open_streams > 0 && overdue {
            // The command exited but a background descendant still holds a pipe.
            kill_group(&mut child);
            break;
        }

        if status.is_some() && open_streams == 0 {
            break;
        }
    }

    while let Ok(event) = rx.try_recv() {
        if let StreamEvent::Chunk { source, bytes } = event {
            match source {
                StreamSource::Stdout => stdout.extend_from_slice(&bytes),
                StreamSource::Stderr => stderr.extend_from_slice(&bytes),
            }
        }
    }
    if open_streams == 0 {
        for handle in readers {
            let _ = handle.join();
        }
    }
    if let Some(handle) = writer {
        let _ = handle.join();
    }

    HookRun {
        status: status.unwrap_or(RunStatus::Error("command state unknown".to_string())),
        stdout,
        stderr,
        elapsed: started.elapsed(),
    }
}

fn spawn_stream_reader<R>(
    mut reader: R,
    source: StreamSource,
    tx: mpsc::Sender<StreamEvent>,
) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = vec![0_u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => {
                    let _ = tx.send(StreamEvent::Closed);
                    break;
                }
                Ok(n) => {
                    let _ = tx.send(StreamEvent::Chunk {
                        source,
                        bytes: buf[..n].to_vec(),
                    });
                }
            }
        }
    })
}

#[cfg(unix)]
fn exit_status(status: ExitStatus) -> RunStatus {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => RunStatus::Exited(code),
        (None, Some(signal)) => RunStatus::Signaled(signal),
        (None, None) => RunStatus::Error("command ended without an exit code".to_string()),
    }
}

#[cfg(not(unix))]
fn exit_status(status: ExitStatus) -> RunStatus {
    match status.code() {
        Some(code) => RunStatus::Exited(code),
        None => RunStatus::Error("command ended without an exit code".to_string()),
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    if let Ok(pid) = i32::try_from(child.id()) {
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> HookCommand {
        HookCommand::new(parts.iter().map(|s| s.to_string()).collect())
    }

    const LONG: Duration = Duration::from_secs(30);

    #[test]
    fn id_joins_argv_with_spaces() {
        assert_eq!(argv(&["uv", "run", "hooks/x.py"]).id(), "uv run hooks/x.py");
    }

    #[test]
    fn successful_command_captures_stdout() {
        let run = run_hook(&argv(&["echo", "hello"]), None, LONG);

        assert!(run.succeeded());
        assert_eq!(run.exit_code(), 0);
        assert_eq!(run.stdout, b"hello\n");
        assert_eq!(run.failure_reason(), None);
    }

    #[test]
    fn single_argument_with_spaces_runs_through_shell() {
        let run = run_hook(&argv(&["echo out; echo oops >&2; exit 3"]), None, LONG);

        assert_eq!(run.status, RunStatus::Exited(3));
        assert_eq!(run.exit_code(), 3);
        assert_eq!(run.stdout, b"out\n");
        assert_eq!(run.failure_reason().as_deref(), Some("exit code 3: oops"));
    }

    #[test]
    fn stdin_is_forwarded() {
        let payload = br#"{"tool_name":"Bash"}"#;
        let run = run_hook(&argv(&["cat"]), Some(payload), LONG);

        assert!(run.succeeded());
        assert_eq!(run.stdout, payload);
    }

    #[test]
    fn timeout_kills_the_command() {
        let run = run_hook(&argv(&["sleep", "20"]), None, Duration::from_millis(200));

        assert_eq!(run.status, RunStatus::TimedOut(Duration::from_millis(200)));
        assert_eq!(run.exit_code(), 1);
        assert!(run.elapsed < Duration::from_secs(10));
        assert_eq!(run.failure_reason().as_deref(), Some("timed out after 0.2s"));
    }

    #[test]
    fn lingering_background_child_does_not_hang() {
        let run = run_hook(
            &argv(&["sleep 20 & echo started"]),
            None,
            Duration::from_millis(500),
        );

        assert_eq!(run.status, RunStatus::Exited(0));
        assert!(run.elapsed < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_a_start_failure() {
        let run = run_hook(&argv(&["/nonexistent/guardrails-hook"]), None, LONG);

        assert!(matches!(run.status, RunStatus::Error(_)));
        assert_eq!(run.exit_code(), 1);
        assert!(run
            .failure_reason()
            .expect("reason")
            .starts_with("failed to start:"));
    }

    #[test]
    fn empty_command_is_a_start_failure() {
        let run = run_hook(&HookCommand::new(Vec::new()), None, LONG);

        assert_eq!(run.exit_code(), 1);
    }

    #[test]
    fn failure_reason_is_truncated() {
        let run = HookRun {
            status: RunStatus::Exited(2),
            stdout: Vec::new(),
            stderr: "é".repeat(2_000).into_bytes(),
            elapsed: Duration::ZERO,
        };

        let reason = run.failure_reason().expect("reason");

        assert_eq!(reason.chars().count(), MAX_ERROR_CHARS);
        assert!(reason.starts_with("exit code 2: é"));
    }
}
