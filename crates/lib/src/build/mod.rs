//! Native builds and the artifact store.
//!
//! A build runs the native build system's configure, compile and install
//! phases inside a per-invocation workspace. Installation goes into a staging
//! image (`DESTDIR`), never the final prefix; the staged tree is promoted
//! into the store only after the install check passes.
//!
//! # Submodules
//!
//! - [`system`] - phase commands per build system
//! - [`execute`] - running phases through a [`ProcessRunner`](crate::process::ProcessRunner)
//! - [`store`] - store layout, completion markers and promotion

pub mod execute;
pub mod store;
pub mod system;

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::placeholder::PlaceholderError;
use crate::util::hash::DirHashError;

pub use execute::{PhaseReport, run_phases};
pub use store::{BUILD_COMPLETE_MARKER, BuildArtifact, BuildMarker, BuildStore, Promotion};
pub use system::{BuildContext, PhaseCommand, phase_commands};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Configure,
  Build,
  Install,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Phase::Configure => "configure",
      Phase::Build => "build",
      Phase::Install => "install",
    };
    write!(f, "{name}")
  }
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("{phase} step failed with exit code {}: {command}\n{output}", describe_exit(.exit_code))]
  Failed {
    phase: Phase,
    command: String,
    exit_code: Option<i32>,
    output: String,
  },

  #[error("{phase} step timed out: {command}: {message}")]
  Timeout {
    phase: Phase,
    command: String,
    message: String,
  },

  #[error("failed to start {phase} step: {command}: {source}")]
  Spawn {
    phase: Phase,
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("placeholder error: {0}")]
  Placeholder(#[from] PlaceholderError),

  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error("invalid completion marker at {path}: {message}")]
  Marker { path: PathBuf, message: String },
}

fn describe_exit(code: &Option<i32>) -> String {
  match code {
    Some(code) => code.to_string(),
    None => "none (killed by signal)".to_string(),
  }
}

/// Directories one build works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
  /// Patched source tree.
  pub source: PathBuf,
  /// Directory holding the build files (`source` or a subdirectory of it).
  pub source_dir: PathBuf,
  /// Out-of-tree build directory.
  pub build: PathBuf,
  /// `DESTDIR` staging image.
  pub stage: PathBuf,
  /// Final install prefix in the store.
  pub prefix: PathBuf,
  /// Scratch space exported as `TMPDIR`.
  pub tmp: PathBuf,
}

impl BuildLayout {
  /// Lay out a workspace rooted at `work`.
  pub fn new(work: &Path, prefix: PathBuf, source_subdir: Option<&str>) -> Self {
    let source = Self::source_path(work);
    let source_dir = match source_subdir {
      Some(sub) => source.join(sub),
      None => source.clone(),
    };
    Self {
      source_dir,
      source,
      build: work.join("build"),
      stage: work.join("stage"),
      prefix,
      tmp: work.join("tmp"),
    }
  }

  /// Where the patched source tree of workspace `work` lives.
  pub fn source_path(work: &Path) -> PathBuf {
    work.join("src")
  }

  /// Where the install step leaves the prefix inside the staging image.
  pub fn staged_prefix(&self) -> PathBuf {
    let relative: PathBuf = self
      .prefix
      .components()
      .filter(|c| matches!(c, Component::Normal(_)))
      .collect();
    self.stage.join(relative)
  }

  pub fn create_dirs(&self) -> Result<(), BuildError> {
    for dir in [&self.build, &self.stage, &self.tmp] {
      std::fs::create_dir_all(dir).map_err(|source| BuildError::Io {
        path: dir.clone(),
        source,
      })?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  #[cfg(unix)]
  fn staged_prefix_nests_final_prefix_under_stage() {
    let layout = BuildLayout::new(
      Path::new("/store/tmp/build-1"),
      PathBuf::from("/store/build/abc"),
      Some("cmake"),
    );
    assert_eq!(layout.source_dir, PathBuf::from("/store/tmp/build-1/src/cmake"));
    assert_eq!(
      layout.staged_prefix(),
      PathBuf::from("/store/tmp/build-1/stage/store/build/abc")
    );
  }

  #[test]
  fn failed_error_mentions_signal_when_no_exit_code() {
    let err = BuildError::Failed {
      phase: Phase::Build,
      command: "make -j4".to_string(),
      exit_code: None,
      output: String::new(),
    };
    assert!(err.to_string().contains("killed by signal"));
  }
}
