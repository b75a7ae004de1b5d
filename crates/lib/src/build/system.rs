//! Phase commands for each supported build system.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{BuildLayout, Phase};
use crate::configure::ConfiguredOptions;
use crate::env::ResolvedEnvironment;
use crate::placeholder::{self, Placeholder, PlaceholderError, Resolver};
use crate::platform::os::Os;
use crate::process::ProcessCommand;
use crate::spec::{BuildSpec, BuildSystemKind, DependencyKind};

/// One native command and the phase it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCommand {
  pub phase: Phase,
  pub command: ProcessCommand,
}

/// Everything placeholders and phase commands are resolved against.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
  pub spec: &'a BuildSpec,
  pub options: &'a ConfiguredOptions,
  pub environment: &'a ResolvedEnvironment,
  pub layout: &'a BuildLayout,
  pub jobs: usize,
  pub os: Os,
}

impl Resolver for BuildContext<'_> {
  fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError> {
    let path = |p: &std::path::Path| p.to_string_lossy().to_string();
    match placeholder {
      Placeholder::Out => Ok(path(&self.layout.prefix)),
      Placeholder::Src => Ok(path(&self.layout.source_dir)),
      Placeholder::Build => Ok(path(&self.layout.build)),
      Placeholder::Jobs => Ok(self.jobs.to_string()),
      Placeholder::Name => Ok(self.spec.name.clone()),
      Placeholder::Version => Ok(self.spec.version.clone()),
      Placeholder::Option(name) => self
        .options
        .values
        .get(name)
        .map(ToString::to_string)
        .ok_or_else(|| PlaceholderError::UnresolvedOption(name.clone())),
      Placeholder::Dep(name) => self
        .environment
        .get(name)
        .map(|d| path(&d.prefix))
        .ok_or_else(|| PlaceholderError::UnresolvedDep(name.clone())),
    }
  }
}

impl BuildContext<'_> {
  /// Environment shared by every phase: the configured build env with
  /// placeholders resolved, `PATH` from resolved tools, search paths for
  /// resolved libraries and the scratch `TMPDIR`.
  pub fn base_env(&self) -> Result<BTreeMap<String, String>, PlaceholderError> {
    let sep = if self.os == Os::Windows { ";" } else { ":" };
    let join = |dirs: Vec<PathBuf>| {
      dirs
        .iter()
        .map(|d| d.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(sep)
    };

    let mut env = BTreeMap::new();
    let bin_dirs = self.environment.bin_dirs();
    if !bin_dirs.is_empty() {
      env.insert("PATH".to_string(), join(bin_dirs));
    }

    let mut library_prefixes: Vec<PathBuf> = Vec::new();
    for entry in &self.environment.entries {
      if entry.kind == DependencyKind::Library && !library_prefixes.contains(&entry.prefix) {
        library_prefixes.push(entry.prefix.clone());
      }
    }
    if !library_prefixes.is_empty() {
      env.insert("CMAKE_PREFIX_PATH".to_string(), join(library_prefixes.clone()));
      env.insert(
        "PKG_CONFIG_PATH".to_string(),
        join(library_prefixes.iter().map(|p| p.join("lib/pkgconfig")).collect()),
      );
    }

    let tmp = self.layout.tmp.to_string_lossy().to_string();
    for key in ["TMPDIR", "TMP", "TEMP"] {
      env.insert(key.to_string(), tmp.clone());
    }
    env.insert("out".to_string(), self.layout.prefix.to_string_lossy().to_string());

    for (key, value) in &self.options.env {
      env.insert(key.clone(), placeholder::substitute(value, self)?);
    }
    Ok(env)
  }

  /// Absolute path of a resolved tool, or its bare name.
  fn tool(&self, name: &str) -> String {
    self
      .environment
      .get(name)
      .map(|d| d.path.to_string_lossy().to_string())
      .unwrap_or_else(|| name.to_string())
  }
}

/// The ordered configure, build and install commands for `ctx`.
pub fn phase_commands(ctx: &BuildContext<'_>) -> Result<Vec<PhaseCommand>, PlaceholderError> {
  let env = ctx.base_env()?;
  let flags = placeholder::substitute_all(&ctx.options.flags, ctx)?;
  let layout = ctx.layout;
  let src = layout.source_dir.to_string_lossy().to_string();
  let build = layout.build.to_string_lossy().to_string();
  let stage = layout.stage.to_string_lossy().to_string();
  let prefix = layout.prefix.to_string_lossy().to_string();

  let step = |phase: Phase, command: ProcessCommand| PhaseCommand {
    phase,
    command: command.envs(&env),
  };

  let commands = match ctx.spec.build.system {
    BuildSystemKind::Cmake => {
      let cmake = ctx.tool("cmake");
      vec![
        step(
          Phase::Configure,
          ProcessCommand::new(&cmake, &layout.build)
            .args(["-S", &src, "-B", &build])
            .arg(format!("-DCMAKE_INSTALL_PREFIX={prefix}"))
            .arg("-DCMAKE_BUILD_TYPE=Release")
            .args(flags),
        ),
        step(
          Phase::Build,
          ProcessCommand::new(&cmake, &layout.build)
            .args(["--build", &build, "--parallel"])
            .arg(ctx.jobs.to_string()),
        ),
        step(
          Phase::Install,
          ProcessCommand::new(&cmake, &layout.build)
            .args(["--install", &build])
            .env("DESTDIR", &stage),
        ),
      ]
    }
    BuildSystemKind::Make => {
      let make = ctx.tool("make");
      vec![
        step(
          Phase::Configure,
          ProcessCommand::new(format!("{src}/configure"), &layout.build)
            .arg(format!("--prefix={prefix}"))
            .args(flags),
        ),
        step(
          Phase::Build,
          ProcessCommand::new(&make, &layout.build).arg(format!("-j{}", ctx.jobs)),
        ),
        step(
          Phase::Install,
          ProcessCommand::new(&make, &layout.build)
            .arg("install")
            .arg(format!("DESTDIR={stage}")),
        ),
      ]
    }
    BuildSystemKind::Custom => {
      let build_spec = &ctx.spec.build;
      let mut commands = Vec::new();
      let joined_flags = flags.join(" ");
      let shell_env = [("src", &src), ("build", &build), ("FLAGS", &joined_flags)];
      for (kind, scripts) in [
        (Phase::Configure, &build_spec.configure),
        (Phase::Build, &build_spec.compile),
        (Phase::Install, &build_spec.install),
      ] {
        for script in scripts {
          let mut command = ProcessCommand::shell(&placeholder::substitute(script, ctx)?, &layout.build);
          for (key, value) in shell_env {
            command = command.env(key, value.as_str());
          }
          if kind == Phase::Install {
            command = command.env("DESTDIR", &stage);
          }
          commands.push(step(kind, command));
        }
      }
      commands
    }
  };

  Ok(commands)
}
