//! Native process execution.
//!
//! Every external tool the pipeline touches (configure, compile, install, the
//! install check, version queries) is started through [`ProcessRunner`].
//! [`TokioRunner`] runs commands for real inside an isolated environment;
//! [`RecordingRunner`] records invocations and answers from a handler so
//! pipeline ordering can be tested without spawning anything.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::{OUTPUT_TAIL_LINES, SOURCE_DATE_EPOCH};

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
  pub program: String,
  pub args: Vec<String>,
  /// Variables set on top of the isolated base environment.
  pub env: BTreeMap<String, String>,
  pub cwd: PathBuf,
}

impl ProcessCommand {
  pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: BTreeMap::new(),
      cwd: cwd.into(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
    self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  /// Run a shell snippet with `/bin/sh -c`.
  pub fn shell(script: &str, cwd: impl Into<PathBuf>) -> Self {
    let (shell, args) = get_shell();
    Self::new(shell, cwd).args(args).arg(script)
  }
}

impl fmt::Display for ProcessCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      if arg.contains(char::is_whitespace) {
        write!(f, " '{arg}'")?;
      } else {
        write!(f, " {arg}")?;
      }
    }
    Ok(())
  }
}

/// What a finished process produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
  /// `None` when the process was terminated by a signal.
  pub exit_code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl ProcessOutput {
  pub fn success(stdout: impl Into<String>) -> Self {
    Self {
      exit_code: Some(0),
      stdout: stdout.into(),
      stderr: String::new(),
    }
  }

  pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
    Self {
      exit_code: Some(code),
      stdout: String::new(),
      stderr: stderr.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.exit_code == Some(0)
  }

  /// The last lines of combined stdout and stderr, for error reports.
  pub fn tail(&self) -> String {
    tail_lines(&format!("{}{}", self.stdout, self.stderr), OUTPUT_TAIL_LINES)
  }
}

/// Keep only the last `n` lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> String {
  let lines: Vec<&str> = text.lines().collect();
  let start = lines.len().saturating_sub(n);
  lines[start..].join("\n")
}

/// Starts native processes.
pub trait ProcessRunner: Send + Sync {
  /// Run `command` to completion and report its exit code and output.
  ///
  /// A non-zero exit is not an error at this level; `Err` means the process
  /// could not be started, its output could not be read, or it timed out.
  fn run(&self, command: &ProcessCommand) -> impl Future<Output = io::Result<ProcessOutput>> + Send;
}

/// Runs processes with tokio in an isolated environment.
///
/// The environment is cleared and rebuilt:
/// - `PATH` is `/path-not-set` unless the command supplies one
/// - `HOME` is `/homeless-shelter`
/// - `LANG`/`LC_ALL` are `C`
/// - `SOURCE_DATE_EPOCH` is fixed
///
/// stdout and stderr are streamed line by line to the log while being
/// captured.
#[derive(Debug, Clone, Default)]
pub struct TokioRunner {
  timeout: Option<Duration>,
}

impl TokioRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Kill any single process that runs longer than `timeout`.
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }
}

impl ProcessRunner for TokioRunner {
  async fn run(&self, cmd: &ProcessCommand) -> io::Result<ProcessOutput> {
    info!(command = %cmd, "running");

    let mut command = Command::new(&cmd.program);
    command
      .args(&cmd.args)
      .current_dir(&cmd.cwd)
      .env_clear()
      .env("PATH", "/path-not-set")
      .env("HOME", "/homeless-shelter")
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
      .envs(&cmd.env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    debug!(program = %cmd.program, cwd = %cmd.cwd.display(), "spawning process");
    let mut child = command.spawn()?;

    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
    let stderr = child
      .stderr
      .take()
      .ok_or_else(|| io::Error::other("child stderr was not captured"))?;
    let stdout_task = tokio::spawn(stream_lines(stdout, "stdout"));
    let stderr_task = tokio::spawn(stream_lines(stderr, "stderr"));

    let status = match self.timeout {
      Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
          child.kill().await?;
          return Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("process exceeded timeout of {}s: {cmd}", limit.as_secs_f64()),
          ));
        }
      },
      None => child.wait().await?,
    };

    let stdout = stdout_task.await.map_err(io::Error::other)??;
    let stderr = stderr_task.await.map_err(io::Error::other)??;

    debug!(code = ?status.code(), "process exited");
    Ok(ProcessOutput {
      exit_code: status.code(),
      stdout,
      stderr,
    })
  }
}

async fn stream_lines<R>(reader: R, stream: &'static str) -> io::Result<String>
where
  R: AsyncRead + Unpin,
{
  let mut reader = BufReader::new(reader);
  let mut captured = String::new();
  let mut buf = Vec::new();

  loop {
    buf.clear();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
      break;
    }
    let line = String::from_utf8_lossy(&buf);
    debug!(target: "pinbuild::output", stream, "{}", line.trim_end());
    captured.push_str(&line);
  }

  Ok(captured)
}

/// Shell used for `custom` build phases.
///
/// Always `/bin/sh` rather than `$SHELL`, whose profile files could leak the
/// user's environment into the build.
fn get_shell() -> (String, Vec<String>) {
  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

type Handler = dyn Fn(&ProcessCommand) -> ProcessOutput + Send + Sync;

/// Records every command and answers from a handler instead of spawning.
///
/// The default handler reports success with empty output. Handlers may
/// perform file system side effects (e.g. populate the install image) to
/// stand in for a real build.
#[derive(Clone)]
pub struct RecordingRunner {
  calls: Arc<Mutex<Vec<ProcessCommand>>>,
  handler: Arc<Handler>,
}

impl Default for RecordingRunner {
  fn default() -> Self {
    Self::new()
  }
}

impl RecordingRunner {
  pub fn new() -> Self {
    Self::with_handler(|_| ProcessOutput::success(""))
  }

  pub fn with_handler<F>(handler: F) -> Self
  where
    F: Fn(&ProcessCommand) -> ProcessOutput + Send + Sync + 'static,
  {
    Self {
      calls: Arc::new(Mutex::new(Vec::new())),
      handler: Arc::new(handler),
    }
  }

  /// Commands run so far, in order.
  pub fn calls(&self) -> Vec<ProcessCommand> {
    self.calls.lock().map(|c| c.clone()).unwrap_or_default()
  }
}

impl fmt::Debug for RecordingRunner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RecordingRunner").field("calls", &self.calls()).finish()
  }
}

impl ProcessRunner for RecordingRunner {
  async fn run(&self, command: &ProcessCommand) -> io::Result<ProcessOutput> {
    if let Ok(mut calls) = self.calls.lock() {
      calls.push(command.clone());
    }
    Ok((self.handler)(command))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn sh(script: &str, cwd: &std::path::Path) -> ProcessCommand {
    ProcessCommand::shell(script, cwd)
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn captures_stdout_and_exit_code() {
    let temp = TempDir::new().unwrap();
    let out = TokioRunner::new().run(&sh("echo hello; echo oops >&2; exit 3", temp.path())).await.unwrap();

    assert_eq!(out.exit_code, Some(3));
    assert_eq!(out.stdout, "hello\n");
    assert_eq!(out.stderr, "oops\n");
    assert!(!out.is_success());
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn environment_is_isolated() {
    let temp = TempDir::new().unwrap();
    let out = TokioRunner::new()
      .run(&sh("echo \"$PATH|$HOME|$SOURCE_DATE_EPOCH|$LANG\"", temp.path()))
      .await
      .unwrap();

    assert_eq!(out.stdout.trim(), "/path-not-set|/homeless-shelter|315532800|C");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn command_env_overrides_base() {
    let temp = TempDir::new().unwrap();
    let cmd = sh("echo \"$PATH $MY_VAR\"", temp.path())
      .env("PATH", "/opt/tools/bin")
      .env("MY_VAR", "value");
    let out = TokioRunner::new().run(&cmd).await.unwrap();

    assert_eq!(out.stdout.trim(), "/opt/tools/bin value");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn runs_in_working_directory() {
    let temp = TempDir::new().unwrap();
    let out = TokioRunner::new().run(&sh("pwd", temp.path())).await.unwrap();
    let reported = std::path::PathBuf::from(out.stdout.trim());

    assert_eq!(
      dunce::canonicalize(reported).unwrap(),
      dunce::canonicalize(temp.path()).unwrap()
    );
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn timeout_kills_process() {
    let temp = TempDir::new().unwrap();
    let runner = TokioRunner::new().with_timeout(Some(Duration::from_millis(100)));
    let err = runner.run(&sh("/bin/sleep 5", temp.path())).await.unwrap_err();

    assert_eq!(err.kind(), io::ErrorKind::TimedOut);
  }

  #[tokio::test]
  async fn missing_program_is_spawn_error() {
    let temp = TempDir::new().unwrap();
    let cmd = ProcessCommand::new("/definitely/not/a/program", temp.path());
    assert!(TokioRunner::new().run(&cmd).await.is_err());
  }

  #[tokio::test]
  async fn recording_runner_records_in_order() {
    let runner = RecordingRunner::with_handler(|cmd| {
      if cmd.program == "fail" {
        ProcessOutput::failure(2, "nope")
      } else {
        ProcessOutput::success("ok")
      }
    });

    let first = runner.run(&ProcessCommand::new("cmake", "/tmp").arg("--version")).await.unwrap();
    let second = runner.run(&ProcessCommand::new("fail", "/tmp")).await.unwrap();

    assert!(first.is_success());
    assert_eq!(second.exit_code, Some(2));
    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].to_string(), "cmake --version");
    assert_eq!(calls[1].program, "fail");
  }

  #[test]
  fn tail_keeps_last_lines() {
    let text = (1..=50).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
    let tail = tail_lines(&text, 3);
    assert_eq!(tail, "48\n49\n50");
  }

  #[test]
  fn display_quotes_arguments_with_spaces() {
    let cmd = ProcessCommand::new("sh", "/").arg("-c").arg("make install");
    assert_eq!(cmd.to_string(), "sh -c 'make install'");
  }
}
