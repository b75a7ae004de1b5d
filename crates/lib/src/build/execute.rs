//! Running build phases.

use std::io;
use std::time::Instant;

use serde::Serialize;
use tracing::{Instrument, error, info, info_span};

use super::{BuildError, Phase, PhaseCommand};
use crate::process::ProcessRunner;

/// Outcome of one successful phase command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
  pub phase: Phase,
  pub command: String,
  pub duration_ms: u64,
}

/// Run `commands` in order, stopping at the first failure.
///
/// Nothing is retried: a non-zero exit fails the build with the tail of the
/// command's output.
pub async fn run_phases<R: ProcessRunner>(runner: &R, commands: &[PhaseCommand]) -> Result<Vec<PhaseReport>, BuildError> {
  let mut reports = Vec::with_capacity(commands.len());

  for PhaseCommand { phase, command } in commands {
    let phase = *phase;
    let label = command.to_string();
    let start = Instant::now();

    let span = info_span!("phase", %phase);
    let output = runner.run(command).instrument(span).await.map_err(|source| {
      if source.kind() == io::ErrorKind::TimedOut {
        BuildError::Timeout {
          phase,
          command: label.clone(),
          message: source.to_string(),
        }
      } else {
        BuildError::Spawn {
          phase,
          command: label.clone(),
          source,
        }
      }
    })?;

    if !output.is_success() {
      error!(%phase, command = %label, code = ?output.exit_code, "build step failed");
      return Err(BuildError::Failed {
        phase,
        command: label,
        exit_code: output.exit_code,
        output: output.tail(),
      });
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(%phase, command = %label, duration_ms, "build step finished");
    reports.push(PhaseReport {
      phase,
      command: label,
      duration_ms,
    });
  }

  Ok(reports)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::process::{ProcessCommand, ProcessOutput, RecordingRunner, TokioRunner};
  use std::time::Duration;
  use tempfile::TempDir;

  fn step(phase: Phase, program: &str) -> PhaseCommand {
    PhaseCommand {
      phase,
      command: ProcessCommand::new(program, "/tmp"),
    }
  }

  #[tokio::test]
  async fn stops_at_first_failure_without_retry() {
    let runner = RecordingRunner::with_handler(|cmd| {
      if cmd.program == "make" {
        ProcessOutput::failure(2, "error: undefined reference to `main'")
      } else {
        ProcessOutput::success("")
      }
    });
    let commands = vec![
      step(Phase::Configure, "configure"),
      step(Phase::Build, "make"),
      step(Phase::Install, "install"),
    ];

    let err = run_phases(&runner, &commands).await.unwrap_err();

    match err {
      BuildError::Failed {
        phase,
        exit_code,
        output,
        ..
      } => {
        assert_eq!(phase, Phase::Build);
        assert_eq!(exit_code, Some(2));
        assert!(output.contains("undefined reference"));
      }
      other => panic!("expected build failure, got {other:?}"),
    }
    let programs: Vec<String> = runner.calls().into_iter().map(|c| c.program).collect();
    assert_eq!(programs, vec!["configure", "make"]);
  }

  #[tokio::test]
  async fn reports_every_phase_in_order() {
    let runner = RecordingRunner::new();
    let commands = vec![step(Phase::Configure, "a"), step(Phase::Build, "b"), step(Phase::Install, "c")];

    let reports = run_phases(&runner, &commands).await.unwrap();

    assert_eq!(
      reports.iter().map(|r| r.phase).collect::<Vec<_>>(),
      vec![Phase::Configure, Phase::Build, Phase::Install]
    );
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn timeout_is_reported_as_timeout() {
    let temp = TempDir::new().unwrap();
    let runner = TokioRunner::new().with_timeout(Some(Duration::from_millis(100)));
    let commands = vec![PhaseCommand {
      phase: Phase::Build,
      command: ProcessCommand::shell("/bin/sleep 5", temp.path()),
    }];

    let err = run_phases(&runner, &commands).await.unwrap_err();
    assert!(matches!(err, BuildError::Timeout { phase: Phase::Build, .. }));
  }

  #[tokio::test]
  async fn missing_program_is_spawn_error() {
    let temp = TempDir::new().unwrap();
    let commands = vec![PhaseCommand {
      phase: Phase::Configure,
      command: ProcessCommand::new("/no/such/configure", temp.path()),
    }];

    let err = run_phases(&TokioRunner::new(), &commands).await.unwrap_err();
    assert!(matches!(err, BuildError::Spawn { phase: Phase::Configure, .. }));
  }
}
