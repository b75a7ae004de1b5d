//! Option resolution and the configure step.
//!
//! [`resolve_options`] is pure: given a spec, the user's requested values and
//! the host facts it produces one immutable [`ConfiguredOptions`] snapshot
//! (option values, active dependencies, flags and environment). [`configure`]
//! then resolves those dependencies on the host so that an unsatisfiable
//! configuration is reported before any native build process starts.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::env::resolve::{ResolveError, ResolvedEnvironment, resolve_environment};
use crate::platform::HostFacts;
use crate::process::ProcessRunner;
use crate::spec::{BuildSpec, Condition, Dependency, OptionSpec, OptionValue};

#[derive(Debug, Error)]
pub enum ConfigureError {
  #[error("unsatisfied option '{option}': {reason}")]
  UnsatisfiedOption { option: String, reason: String },

  #[error("missing build dependency '{name}': {reason}")]
  MissingTool { name: String, reason: String },
}

/// Why a dependency is part of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Requirement {
  /// Declared unconditionally (or gated only on the host platform).
  Always,
  /// Pulled in by an option.
  Option(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveDependency {
  #[serde(flatten)]
  pub dependency: Dependency,
  pub required_by: Requirement,
}

/// Fully resolved configuration. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfiguredOptions {
  pub values: BTreeMap<String, OptionValue>,
  /// Active dependencies in declaration order: base list first, then
  /// conditional fragments in the order they appear.
  pub dependencies: Vec<ActiveDependency>,
  pub flags: Vec<String>,
  pub env: BTreeMap<String, String>,
}

/// Resolve the option set for `spec` on `host`.
///
/// `requested` holds raw `name -> value` strings from the command line.
pub fn resolve_options(
  spec: &BuildSpec,
  requested: &BTreeMap<String, String>,
  host: &HostFacts,
) -> Result<ConfiguredOptions, ConfigureError> {
  let mut values: BTreeMap<String, OptionValue> = spec
    .options
    .iter()
    .map(|(name, option)| (name.clone(), option.default.clone()))
    .collect();

  for (name, raw) in requested {
    let option = spec.options.get(name).ok_or_else(|| ConfigureError::UnsatisfiedOption {
      option: name.clone(),
      reason: if spec.options.is_empty() {
        "unknown option (this spec declares no options)".to_string()
      } else {
        format!(
          "unknown option (declared: {})",
          spec.options.keys().cloned().collect::<Vec<_>>().join(", ")
        )
      },
    })?;
    values.insert(name.clone(), parse_value(name, option, raw)?);
  }

  for (name, option) in &spec.options {
    if !values[name].is_enabled() {
      continue;
    }
    for other in &option.conflicts {
      if values.get(other).is_some_and(OptionValue::is_enabled) {
        return Err(ConfigureError::UnsatisfiedOption {
          option: name.clone(),
          reason: format!("conflicts with enabled option '{other}'"),
        });
      }
    }
  }

  let os = host.platform.os;
  let mut dependencies: Vec<ActiveDependency> = spec
    .dependencies
    .iter()
    .filter(|dep| dep.applies_to(os))
    .map(|dep| ActiveDependency {
      dependency: dep.clone(),
      required_by: Requirement::Always,
    })
    .collect();
  let mut flags = spec.build.flags.clone();
  let mut env = spec.build.env.clone();

  for fragment in &spec.conditional {
    if !condition_matches(&fragment.when, host, &values) {
      continue;
    }
    let required_by = match &fragment.when.option {
      Some(option) => Requirement::Option(option.clone()),
      None => Requirement::Always,
    };
    for dep in fragment.dependencies.iter().filter(|d| d.applies_to(os)) {
      if dependencies.iter().any(|active| active.dependency.name == dep.name) {
        continue;
      }
      dependencies.push(ActiveDependency {
        dependency: dep.clone(),
        required_by: required_by.clone(),
      });
    }
    flags.extend(fragment.flags.iter().cloned());
    env.extend(fragment.env.iter().map(|(k, v)| (k.clone(), v.clone())));
  }

  debug!(
    options = values.len(),
    dependencies = dependencies.len(),
    flags = flags.len(),
    "resolved options"
  );

  Ok(ConfiguredOptions {
    values,
    dependencies,
    flags,
    env,
  })
}

fn parse_value(name: &str, option: &OptionSpec, raw: &str) -> Result<OptionValue, ConfigureError> {
  match &option.default {
    OptionValue::Bool(_) => match raw.to_ascii_lowercase().as_str() {
      "true" | "on" | "yes" | "1" => Ok(OptionValue::Bool(true)),
      "false" | "off" | "no" | "0" => Ok(OptionValue::Bool(false)),
      _ => Err(ConfigureError::UnsatisfiedOption {
        option: name.to_string(),
        reason: format!("'{raw}' is not a boolean (use true/false)"),
      }),
    },
    OptionValue::String(_) => {
      if !option.choices.is_empty() && !option.choices.iter().any(|c| c == raw) {
        return Err(ConfigureError::UnsatisfiedOption {
          option: name.to_string(),
          reason: format!("'{raw}' is not one of: {}", option.choices.join(", ")),
        });
      }
      Ok(OptionValue::String(raw.to_string()))
    }
  }
}

fn condition_matches(when: &Condition, host: &HostFacts, values: &BTreeMap<String, OptionValue>) -> bool {
  if when.os.is_some_and(|os| os != host.platform.os) {
    return false;
  }
  if when.arch.is_some_and(|arch| arch != host.platform.arch) {
    return false;
  }
  match (&when.option, &when.equals) {
    (Some(name), Some(expected)) => values.get(name) == Some(expected),
    (Some(name), None) => values.get(name).is_some_and(OptionValue::is_enabled),
    (None, _) => true,
  }
}

/// Resolve options and dependencies together as one consistent snapshot.
///
/// Only version queries run here; no build process is started. A dependency
/// pulled in by an option that cannot be satisfied is reported as an
/// unsatisfied option, any other as a missing tool.
pub async fn configure<R: ProcessRunner>(
  spec: &BuildSpec,
  requested: &BTreeMap<String, String>,
  host: &HostFacts,
  runner: &R,
) -> Result<(ConfiguredOptions, ResolvedEnvironment), ConfigureError> {
  let options = resolve_options(spec, requested, host)?;
  let deps: Vec<Dependency> = options.dependencies.iter().map(|a| a.dependency.clone()).collect();

  let environment = resolve_environment(&deps, host, runner).await.map_err(|err| {
    let requirement = options
      .dependencies
      .iter()
      .find(|a| a.dependency.name == err.dependency())
      .map(|a| a.required_by.clone())
      .unwrap_or(Requirement::Always);
    configure_error(err, requirement)
  })?;

  info!(
    dependencies = environment.entries.len(),
    "configuration resolved"
  );
  Ok((options, environment))
}

fn configure_error(err: ResolveError, requirement: Requirement) -> ConfigureError {
  match requirement {
    Requirement::Option(option) => ConfigureError::UnsatisfiedOption {
      option,
      reason: err.to_string(),
    },
    Requirement::Always => ConfigureError::MissingTool {
      name: err.dependency().to_string(),
      reason: err.to_string(),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::Platform;
  use crate::platform::arch::Arch;
  use crate::platform::os::Os;
  use crate::process::RecordingRunner;
  use crate::spec::parse_spec;

  fn host(os: Os, arch: Arch) -> HostFacts {
    HostFacts {
      platform: Platform::new(arch, os),
      search_path: vec![],
      prefixes: vec![],
    }
  }

  fn spec() -> BuildSpec {
    parse_spec(
      r#"
name = "glslc"
version = "2024.1"

[source]
path = "src"
sha256 = "0000000000000000000000000000000000000000000000000000000000000000"

[options.with_extra]
default = false

[options.backend]
default = "vulkan"
choices = ["vulkan", "opengl"]

[options.minimal]
default = false
conflicts = ["with_extra"]

[[dependencies]]
name = "cmake"

[[dependencies]]
name = "xcrun"
platforms = ["darwin"]

[[conditional]]
when = { option = "with_extra" }
dependencies = [{ name = "python3" }]
flags = ["-DEXTRA=ON"]

[[conditional]]
when = { option = "with_extra", equals = false }
flags = ["-DEXTRA=OFF"]

[[conditional]]
when = { os = "linux" }
env = { CFLAGS = "-fPIC" }

[build]
system = "cmake"
flags = ["-DSHADERC_SKIP_TESTS=ON"]

[check]
command = ["bin/glslc", "--version"]
"#,
    )
    .unwrap()
  }

  fn names(options: &ConfiguredOptions) -> Vec<&str> {
    options.dependencies.iter().map(|d| d.dependency.name.as_str()).collect()
  }

  #[test]
  fn defaults_omit_option_gated_dependency() {
    let options = resolve_options(&spec(), &BTreeMap::new(), &host(Os::Linux, Arch::X86_64)).unwrap();

    assert_eq!(names(&options), vec!["cmake"]);
    assert_eq!(options.flags, vec!["-DSHADERC_SKIP_TESTS=ON", "-DEXTRA=OFF"]);
    assert_eq!(options.env.get("CFLAGS").map(String::as_str), Some("-fPIC"));
    assert_eq!(options.values["with_extra"], OptionValue::Bool(false));
  }

  #[test]
  fn enabling_option_adds_dependency_and_flag() {
    let requested = BTreeMap::from([("with_extra".to_string(), "on".to_string())]);
    let options = resolve_options(&spec(), &requested, &host(Os::MacOs, Arch::Aarch64)).unwrap();

    assert_eq!(names(&options), vec!["cmake", "xcrun", "python3"]);
    assert_eq!(options.dependencies[2].required_by, Requirement::Option("with_extra".into()));
    assert_eq!(options.flags, vec!["-DSHADERC_SKIP_TESTS=ON", "-DEXTRA=ON"]);
    assert!(options.env.is_empty());
  }

  #[test]
  fn resolution_is_deterministic() {
    let requested = BTreeMap::from([("backend".to_string(), "opengl".to_string())]);
    let host = host(Os::Linux, Arch::X86_64);
    assert_eq!(
      resolve_options(&spec(), &requested, &host).unwrap(),
      resolve_options(&spec(), &requested, &host).unwrap()
    );
  }

  #[test]
  fn unknown_option_is_unsatisfied() {
    let requested = BTreeMap::from([("nope".to_string(), "1".to_string())]);
    let err = resolve_options(&spec(), &requested, &host(Os::Linux, Arch::X86_64)).unwrap_err();
    assert!(matches!(err, ConfigureError::UnsatisfiedOption { option, .. } if option == "nope"));
  }

  #[test]
  fn invalid_values_are_unsatisfied() {
    let host = host(Os::Linux, Arch::X86_64);
    let bad_bool = BTreeMap::from([("with_extra".to_string(), "maybe".to_string())]);
    assert!(resolve_options(&spec(), &bad_bool, &host).is_err());

    let bad_choice = BTreeMap::from([("backend".to_string(), "metal".to_string())]);
    let err = resolve_options(&spec(), &bad_choice, &host).unwrap_err();
    assert!(err.to_string().contains("not one of: vulkan, opengl"));
  }

  #[test]
  fn conflicting_options_are_unsatisfied() {
    let requested = BTreeMap::from([
      ("with_extra".to_string(), "true".to_string()),
      ("minimal".to_string(), "true".to_string()),
    ]);
    let err = resolve_options(&spec(), &requested, &host(Os::Linux, Arch::X86_64)).unwrap_err();
    assert!(matches!(err, ConfigureError::UnsatisfiedOption { option, .. } if option == "minimal"));
  }

  #[tokio::test]
  async fn missing_option_dependency_fails_before_any_process() {
    let runner = RecordingRunner::new();
    let requested = BTreeMap::from([("with_extra".to_string(), "true".to_string())]);
    // empty search path: nothing can be found
    let err = configure(&spec(), &requested, &host(Os::Linux, Arch::X86_64), &runner)
      .await
      .unwrap_err();

    // cmake is declared first and is unconditional
    assert!(matches!(err, ConfigureError::MissingTool { ref name, .. } if name == "cmake"));
    assert!(runner.calls().is_empty());
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn missing_gated_dependency_is_unsatisfied_option() {
    let temp = tempfile::tempdir().unwrap();
    crate::util::testutil::write_script(&temp.path().join("cmake"), "echo 'cmake version 3.28.3'");

    let mut facts = host(Os::Linux, Arch::X86_64);
    facts.search_path = vec![temp.path().to_path_buf()];
    let runner = RecordingRunner::new();
    let requested = BTreeMap::from([("with_extra".to_string(), "true".to_string())]);

    let err = configure(&spec(), &requested, &facts, &runner).await.unwrap_err();
    assert!(matches!(err, ConfigureError::UnsatisfiedOption { ref option, .. } if option == "with_extra"));
    assert!(err.to_string().contains("python3"));
  }
}
