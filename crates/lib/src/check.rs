//! Post-install verification against the staged tree.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use crate::build::BuildContext;
use crate::placeholder::{self, Placeholder, PlaceholderError, Resolver};
use crate::process::{ProcessCommand, ProcessRunner};

#[derive(Debug, Error)]
pub enum CheckError {
  #[error("install check '{command}' exited with {actual:?}, expected {expected}\n{output}")]
  ExitCode {
    command: String,
    expected: i32,
    actual: Option<i32>,
    output: String,
  },

  #[error("install check '{command}' did not report version {version}\n{output}")]
  Version {
    command: String,
    version: String,
    output: String,
  },

  #[error("install check '{command}' output does not contain '{expected}'\n{output}")]
  Output {
    command: String,
    expected: String,
    output: String,
  },

  #[error("declared output '{name}' is missing from the installed tree: {path}")]
  MissingOutput { name: String, path: PathBuf },

  #[error("install check produced no files under {0}")]
  EmptyInstall(PathBuf),

  #[error("failed to run install check '{command}': {source}")]
  Spawn {
    command: String,
    #[source]
    source: io::Error,
  },

  #[error("placeholder error in install check: {0}")]
  Placeholder(#[from] PlaceholderError),
}

/// Resolves `$${out}` to the staged copy of the prefix, where the files
/// actually are until promotion.
struct StagedResolver<'a> {
  ctx: &'a BuildContext<'a>,
  staged: String,
}

impl Resolver for StagedResolver<'_> {
  fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError> {
    match placeholder {
      Placeholder::Out => Ok(self.staged.clone()),
      other => self.ctx.resolve(other),
    }
  }
}

/// Verify the staged install: declared outputs exist, then the check
/// command exits as expected and reports the declared version.
pub async fn install_check<R: ProcessRunner>(ctx: &BuildContext<'_>, runner: &R) -> Result<(), CheckError> {
  let staged = ctx.layout.staged_prefix();
  if !staged.is_dir() {
    return Err(CheckError::EmptyInstall(staged));
  }

  for (name, rel) in &ctx.spec.outputs {
    let path = staged.join(rel);
    if !path.exists() {
      warn!(output = %name, path = %path.display(), "declared output missing");
      return Err(CheckError::MissingOutput {
        name: name.clone(),
        path,
      });
    }
  }

  let resolver = StagedResolver {
    ctx,
    staged: staged.to_string_lossy().to_string(),
  };
  let check = &ctx.spec.check;
  let argv = placeholder::substitute_all(&check.command, &resolver)?;
  let Some((program, args)) = argv.split_first() else {
    return Ok(());
  };

  // bin/glslc is relative to the installed prefix; bare names go through PATH
  let program = if program.contains('/') && !program.starts_with('/') {
    staged.join(program).to_string_lossy().to_string()
  } else {
    program.clone()
  };

  let mut env = ctx.base_env()?;
  let sep = if cfg!(windows) { ";" } else { ":" };
  let staged_bin = staged.join("bin").to_string_lossy().to_string();
  let path = match env.remove("PATH") {
    Some(rest) => format!("{staged_bin}{sep}{rest}"),
    None => staged_bin,
  };
  env.insert("PATH".to_string(), path);
  let staged_lib = staged.join("lib");
  if staged_lib.is_dir() {
    env.insert(
      ctx.os.library_path_var().to_string(),
      staged_lib.to_string_lossy().to_string(),
    );
  }

  let command = ProcessCommand::new(program, &ctx.layout.build).args(args.iter().cloned()).envs(&env);
  let label = command.to_string();
  let output = runner.run(&command).await.map_err(|source| CheckError::Spawn {
    command: label.clone(),
    source,
  })?;

  if output.exit_code != Some(check.expect_exit) {
    return Err(CheckError::ExitCode {
      command: label,
      expected: check.expect_exit,
      actual: output.exit_code,
      output: output.tail(),
    });
  }

  let combined = format!("{}{}", output.stdout, output.stderr);
  if check.expect_version && !reports_version(&combined, &ctx.spec.version) {
    return Err(CheckError::Version {
      command: label,
      version: ctx.spec.version.clone(),
      output: output.tail(),
    });
  }

  if let Some(expected) = &check.expect_output
    && !combined.contains(expected.as_str())
  {
    return Err(CheckError::Output {
      command: label,
      expected: expected.clone(),
      output: output.tail(),
    });
  }

  info!(command = %label, "install check passed");
  Ok(())
}

/// Whether `version` appears in `output` as a whole version token: not
/// preceded by a digit or `.`, not followed by a digit or by `.` and a digit.
fn reports_version(output: &str, version: &str) -> bool {
  if version.is_empty() {
    return false;
  }
  output.match_indices(version).any(|(start, _)| {
    let before = output[..start].chars().next_back();
    let mut after = output[start + version.len()..].chars();
    let starts_clean = !matches!(before, Some(c) if c.is_ascii_digit() || c == '.');
    let ends_clean = match after.next() {
      Some(c) if c.is_ascii_digit() => false,
      Some('.') => !matches!(after.next(), Some(c) if c.is_ascii_digit()),
      _ => true,
    };
    starts_clean && ends_clean
  })
}
