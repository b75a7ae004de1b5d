//! Implementation of the `pinbuild env` command.
//!
//! Prints the dev-shell activation script on stdout, for
//! `eval "$(pinbuild env)"`.

use anyhow::{Context, Result};

use pinbuild_lib::env::ShellKind;
use pinbuild_lib::pipeline::Pipeline;
use pinbuild_lib::process::TokioRunner;

use super::{SpecArgs, context};
use crate::output::print_json;

pub fn cmd_env(args: SpecArgs, shell: Option<ShellKind>, json: bool) -> Result<()> {
  let request = args.request()?;
  let (host, store, rt) = context()?;
  let runner = TokioRunner::new();
  let pipeline = Pipeline::new(&runner, &host, &store);

  let descriptor = rt
    .block_on(pipeline.dev_environment(&request))
    .context("Failed to compose dev shell environment")?;

  if json {
    return print_json(&descriptor);
  }

  let shell = shell.unwrap_or_else(|| {
    std::env::var("SHELL")
      .map(|path| ShellKind::from_shell_path(&path))
      .unwrap_or(ShellKind::Sh)
  });
  print!("{}", descriptor.render(shell));
  Ok(())
}
