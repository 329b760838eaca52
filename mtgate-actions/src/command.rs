//! External command execution with a bounded wait.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One external command: program, arguments, working directory and the
/// longest it may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program and arguments joined with spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cwd {
            Some(dir) => write!(f, "cd {} && {}", dir.display(), self.command_line()),
            None => f.write_str(&self.command_line()),
        }
    }
}

/// Result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded { stdout: String },
    TimedOut,
    Failed(String),
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded { .. })
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Succeeded { .. } => f.write_str("succeeded"),
            ActionOutcome::TimedOut => f.write_str("timed out"),
            ActionOutcome::Failed(detail) => write!(f, "failed: {detail}"),
        }
    }
}

/// Runs external commands. Swapped for a scripted fake in tests.
pub trait CommandRunner {
    fn run(&mut self, spec: &CommandSpec) -> ActionOutcome;
}

/// Spawns real processes, polling until they exit or their timeout passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, spec: &CommandSpec) -> ActionOutcome {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        tracing::info!("running: {spec}");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return ActionOutcome::Failed(format!("`{}` not found", spec.program))
            }
            Err(e) => return ActionOutcome::Failed(format!("could not start `{}`: {e}", spec.program)),
        };

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let outcome = wait_bounded(&mut child, spec.timeout);

        match outcome {
            Waited::Exited(status) if status.success() => ActionOutcome::Succeeded {
                stdout: collect(stdout),
            },
            Waited::Exited(status) => {
                let stderr = collect(stderr);
                let detail = match stderr.trim() {
                    "" => status.to_string(),
                    text => format!("{status}: {}", last_lines(text, 5)),
                };
                ActionOutcome::Failed(detail)
            }
            Waited::TimedOut => {
                tracing::warn!(timeout = ?spec.timeout, "command timed out, killing: {spec}");
                let _ = child.kill();
                let _ = child.wait();
                ActionOutcome::TimedOut
            }
            Waited::Error(e) => ActionOutcome::Failed(format!("wait failed: {e}")),
        }
    }
}

enum Waited {
    Exited(std::process::ExitStatus),
    TimedOut,
    Error(std::io::Error),
}

fn wait_bounded(child: &mut Child, timeout: Duration) -> Waited {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Waited::Exited(status),
            Ok(None) if Instant::now() >= deadline => return Waited::TimedOut,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Waited::Error(e),
        }
    }
}

// Pipes are read on their own threads so a chatty child cannot fill the
// pipe buffer and stall before it exits.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }))
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> CommandSpec {
        CommandSpec::new("sh", timeout).args(["-c", script])
    }

    #[test]
    fn display_includes_working_directory() {
        let spec = CommandSpec::new("docker", Duration::from_secs(1))
            .args(["compose", "up", "-d"])
            .cwd("/opt/remnanode");
        assert_eq!(spec.to_string(), "cd /opt/remnanode && docker compose up -d");
        assert_eq!(spec.command_line(), "docker compose up -d");
    }

    #[test]
    #[cfg(unix)]
    fn successful_command_captures_stdout() {
        let outcome = SystemRunner.run(&sh("echo ready", Duration::from_secs(10)));
        assert_eq!(
            outcome,
            ActionOutcome::Succeeded {
                stdout: "ready\n".to_string()
            }
        );
    }

    #[test]
    #[cfg(unix)]
    fn non_zero_exit_reports_stderr() {
        let outcome = SystemRunner.run(&sh("echo boom >&2; exit 3", Duration::from_secs(10)));
        match outcome {
            ActionOutcome::Failed(detail) => assert!(detail.contains("boom"), "{detail}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn slow_command_times_out() {
        let started = Instant::now();
        let outcome = SystemRunner.run(&sh("sleep 5", Duration::from_millis(200)));
        assert_eq!(outcome, ActionOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_a_failure() {
        let spec = CommandSpec::new("mtgate-no-such-program", Duration::from_secs(1));
        match SystemRunner.run(&spec) {
            ActionOutcome::Failed(detail) => assert!(detail.contains("not found"), "{detail}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
