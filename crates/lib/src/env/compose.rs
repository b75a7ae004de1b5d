//! Development shell activation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use serde::ser::SerializeMap;
use thiserror::Error;
use tracing::info;

use super::resolve::{ResolvedEnvironment, resolve_environment};
use crate::platform::HostFacts;
use crate::platform::os::Os;
use crate::process::ProcessRunner;
use crate::spec::ShellSpec;

#[derive(Debug, Error)]
pub enum ComposeError {
  #[error("missing dev-shell tool '{name}': {reason}")]
  MissingTool { name: String, reason: String },

  #[error("spec declares no [shell] section")]
  NoShell,
}

/// Ordered environment variable assignments that activate a dev shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationDescriptor {
  vars: Vec<(String, String)>,
}

impl ActivationDescriptor {
  pub fn get(&self, name: &str) -> Option<&str> {
    self.vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
  }

  pub fn vars(&self) -> &[(String, String)] {
    &self.vars
  }

  pub fn is_empty(&self) -> bool {
    self.vars.is_empty()
  }

  /// Set `name`, keeping the position of an earlier assignment.
  fn set(&mut self, name: &str, value: String) {
    match self.vars.iter_mut().find(|(k, _)| k == name) {
      Some((_, existing)) => *existing = value,
      None => self.vars.push((name.to_string(), value)),
    }
  }

  /// Append path entries to `name`, creating it when absent.
  fn append_paths(&mut self, name: &str, entries: &[PathBuf], separator: &str) {
    if entries.is_empty() {
      return;
    }
    let joined = join_paths(entries, separator);
    match self.vars.iter_mut().find(|(k, _)| k == name) {
      Some((_, existing)) => {
        existing.push_str(separator);
        existing.push_str(&joined);
      }
      None => self.vars.push((name.to_string(), joined)),
    }
  }

  /// Render as a script to be `eval`ed or sourced by `shell`.
  pub fn render(&self, shell: ShellKind) -> String {
    let mut out = String::new();
    for (name, value) in &self.vars {
      match shell {
        ShellKind::Sh | ShellKind::Bash | ShellKind::Zsh => {
          out.push_str(&format!("export {name}={}\n", sh_quote(value)));
        }
        ShellKind::Fish => {
          if is_path_list(name) {
            let parts: Vec<String> = value.split(':').map(sh_quote).collect();
            out.push_str(&format!("set -gx {name} {}\n", parts.join(" ")));
          } else {
            out.push_str(&format!("set -gx {name} {}\n", sh_quote(value)));
          }
        }
      }
    }
    out
  }
}

impl Serialize for ActivationDescriptor {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.vars.len()))?;
    for (name, value) in &self.vars {
      map.serialize_entry(name, value)?;
    }
    map.end()
  }
}

fn is_path_list(name: &str) -> bool {
  name == "PATH" || name.ends_with("_PATH")
}

fn sh_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}

fn join_paths(entries: &[PathBuf], separator: &str) -> String {
  entries
    .iter()
    .map(|p| p.display().to_string())
    .collect::<Vec<_>>()
    .join(separator)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
  Sh,
  Bash,
  Zsh,
  Fish,
}

impl ShellKind {
  /// Guess from a `$SHELL` path, defaulting to `sh`.
  pub fn from_shell_path(path: &str) -> Self {
    let name = Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or("sh");
    name.parse().unwrap_or(ShellKind::Sh)
  }
}

impl FromStr for ShellKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "sh" => Ok(ShellKind::Sh),
      "bash" => Ok(ShellKind::Bash),
      "zsh" => Ok(ShellKind::Zsh),
      "fish" => Ok(ShellKind::Fish),
      other => Err(format!("unsupported shell '{other}' (expected sh, bash, zsh or fish)")),
    }
  }
}

impl fmt::Display for ShellKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ShellKind::Sh => "sh",
      ShellKind::Bash => "bash",
      ShellKind::Zsh => "zsh",
      ShellKind::Fish => "fish",
    };
    write!(f, "{name}")
  }
}

fn separator(os: Os) -> &'static str {
  match os {
    Os::Windows => ";",
    _ => ":",
  }
}

/// Build the activation descriptor from already resolved dependencies.
///
/// Variables appear in this order: `PATH` (the artifact's `bin` first when
/// given, then tool directories), the loader path from library directories,
/// each `compose` entry, then literal `set` values. Within a variable,
/// fragments follow dependency declaration order. Composed fragments are
/// only included when the directory exists.
pub fn compose(
  shell: &ShellSpec,
  resolved: &ResolvedEnvironment,
  os: Os,
  artifact_prefix: Option<&Path>,
) -> ActivationDescriptor {
  let sep = separator(os);
  let mut descriptor = ActivationDescriptor::default();

  let mut path_entries = Vec::new();
  if let Some(prefix) = artifact_prefix {
    path_entries.push(prefix.join("bin"));
  }
  path_entries.extend(resolved.bin_dirs());
  descriptor.append_paths("PATH", &path_entries, sep);
  descriptor.append_paths(os.library_path_var(), &resolved.lib_dirs(), sep);

  for (var, composition) in &shell.compose {
    let mut fragments = Vec::new();
    for entry in &resolved.entries {
      if !composition.from.is_empty() && !composition.from.contains(&entry.name) {
        continue;
      }
      let dir = entry.prefix.join(&composition.subpath);
      if dir.is_dir() && !fragments.contains(&dir) {
        fragments.push(dir);
      }
    }
    descriptor.append_paths(var, &fragments, sep);
  }

  for (var, value) in &shell.set {
    descriptor.set(var, value.clone());
  }

  descriptor
}

/// Resolve the shell's dependencies on `host` and compose the descriptor.
///
/// Any absent tool or library fails immediately with
/// [`ComposeError::MissingTool`].
pub async fn compose_environment<R: ProcessRunner>(
  shell: Option<&ShellSpec>,
  host: &HostFacts,
  runner: &R,
  artifact_prefix: Option<&Path>,
) -> Result<ActivationDescriptor, ComposeError> {
  let shell = shell.ok_or(ComposeError::NoShell)?;
  let deps: Vec<_> = shell
    .dependencies
    .iter()
    .filter(|d| d.applies_to(host.platform.os))
    .cloned()
    .collect();

  let resolved = resolve_environment(&deps, host, runner)
    .await
    .map_err(|err| ComposeError::MissingTool {
      name: err.dependency().to_string(),
      reason: err.to_string(),
    })?;

  let descriptor = compose(shell, &resolved, host.platform.os, artifact_prefix);
  info!(vars = descriptor.vars().len(), "composed dev shell environment");
  Ok(descriptor)
}
