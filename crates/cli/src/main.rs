mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pinbuild_lib::consts::DEFAULT_SPEC_FILE;
use pinbuild_lib::env::ShellKind;
use pinbuild_lib::pipeline::PipelineError;

use crate::cmd::{SpecArgs, cmd_build, cmd_env, cmd_fetch, cmd_hash, cmd_info, cmd_plan};
use crate::output::{Status, status};

/// pinbuild - reproducible native builds from pinned descriptors
#[derive(Parser)]
#[command(name = "pinbuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (including native build output)
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Options shared by every command that reads a spec.
#[derive(Args)]
struct SpecOpts {
  /// Path to the build spec
  #[arg(default_value = DEFAULT_SPEC_FILE)]
  spec: PathBuf,

  /// Override a build option (repeatable)
  #[arg(short = 'o', long = "option", value_name = "NAME=VALUE", value_parser = parse_option)]
  options: Vec<(String, String)>,

  /// Select a named variant of the spec
  #[arg(long)]
  variant: Option<String>,
}

impl From<SpecOpts> for SpecArgs {
  fn from(opts: SpecOpts) -> Self {
    SpecArgs {
      spec: opts.spec,
      options: opts.options.into_iter().collect(),
      variant: opts.variant,
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Fetch, patch, configure, build, verify and promote an artifact
  Build {
    #[command(flatten)]
    spec: SpecOpts,

    /// Parallel build jobs (default: number of CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Kill any single build step running longer than this (e.g. "30m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the development shell environment
  Env {
    #[command(flatten)]
    spec: SpecOpts,

    /// Shell syntax to emit (default: from $SHELL)
    #[arg(short, long)]
    shell: Option<ShellKind>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Fetch and verify the pinned source without building
  Fetch {
    #[command(flatten)]
    spec: SpecOpts,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Resolve options and dependencies and show the build plan
  Plan {
    #[command(flatten)]
    spec: SpecOpts,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the content hash of a directory or archive, for pinning
  Hash {
    path: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Show host facts and store locations
  Info {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.trim().to_string())),
    _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
  }
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

/// Exit code for a failed command: the pipeline's code when the failure
/// came from it, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
  err
    .downcast_ref::<PipelineError>()
    .and_then(|e| u8::try_from(e.exit_code()).ok())
    .unwrap_or(1)
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Build {
      spec,
      jobs,
      timeout,
      json,
    } => cmd_build(spec.into(), jobs, timeout, json),
    Commands::Env { spec, shell, json } => cmd_env(spec.into(), shell, json),
    Commands::Fetch { spec, json } => cmd_fetch(spec.into(), json),
    Commands::Plan { spec, json } => cmd_plan(spec.into(), json),
    Commands::Hash { path, json } => cmd_hash(&path, json),
    Commands::Info { json } => cmd_info(json),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      status(Status::Fail, format_args!("{err:#}"));
      ExitCode::from(exit_code(&err))
    }
  }
}
