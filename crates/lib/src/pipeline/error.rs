use thiserror::Error;

use crate::build::BuildError;
use crate::check::CheckError;
use crate::configure::ConfigureError;
use crate::env::ComposeError;
use crate::fetch::FetchError;
use crate::patch::PatchError;
use crate::platform::UnsupportedPlatform;
use crate::spec::SpecError;
use crate::store_lock::StoreLockError;
use crate::util::hash::HashError;

/// Any failure of a pipeline operation.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Spec(#[from] SpecError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Patch(#[from] PatchError),

  #[error(transparent)]
  Configure(#[from] ConfigureError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Check(#[from] CheckError),

  #[error(transparent)]
  Compose(#[from] ComposeError),

  #[error(transparent)]
  Lock(#[from] StoreLockError),

  #[error(transparent)]
  Platform(#[from] UnsupportedPlatform),

  #[error("failed to hash build plan: {0}")]
  Plan(#[from] HashError),
}

impl PipelineError {
  /// Process exit code for this failure.
  pub fn exit_code(&self) -> i32 {
    match self {
      PipelineError::Fetch(_) => 2,
      PipelineError::Patch(_) => 3,
      PipelineError::Configure(_) => 4,
      PipelineError::Build(BuildError::Io { .. } | BuildError::Hash(_) | BuildError::Marker { .. }) => 1,
      PipelineError::Build(_) => 5,
      PipelineError::Check(_) => 6,
      PipelineError::Compose(ComposeError::MissingTool { .. }) => 7,
      PipelineError::Compose(ComposeError::NoShell)
      | PipelineError::Spec(_)
      | PipelineError::Lock(_)
      | PipelineError::Platform(_)
      | PipelineError::Plan(_) => 1,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::Phase;
  use std::path::PathBuf;

  #[test]
  fn exit_codes_follow_failure_kind() {
    let integrity = PipelineError::from(FetchError::Integrity {
      location: "path:src".to_string(),
      expected: "a".to_string(),
      actual: "b".to_string(),
    });
    let conflict = PipelineError::from(PatchError::Parse {
      patch: PathBuf::from("a.patch"),
      line: 1,
      message: "bad".to_string(),
    });
    let option = PipelineError::from(ConfigureError::UnsatisfiedOption {
      option: "x".to_string(),
      reason: "y".to_string(),
    });
    let build = PipelineError::from(BuildError::Failed {
      phase: Phase::Build,
      command: "make".to_string(),
      exit_code: Some(2),
      output: String::new(),
    });
    let check = PipelineError::from(CheckError::EmptyInstall(PathBuf::from("/stage")));
    let tool = PipelineError::from(ComposeError::MissingTool {
      name: "glslc".to_string(),
      reason: "not found".to_string(),
    });
    let spec = PipelineError::from(SpecError::Invalid {
      field: "name".to_string(),
      message: "empty".to_string(),
    });

    assert_eq!(
      [&integrity, &conflict, &option, &build, &check, &tool, &spec].map(PipelineError::exit_code),
      [2, 3, 4, 5, 6, 7, 1]
    );
  }

  #[test]
  fn store_io_is_not_a_build_failure() {
    let err = PipelineError::from(BuildError::Io {
      path: PathBuf::from("/store/tmp"),
      source: std::io::Error::other("disk full"),
    });
    assert_eq!(err.exit_code(), 1);
  }
}
