use std::collections::BTreeSet;
use std::path::{Component, Path};

use tracing::debug;

use super::SpecError;
use super::types::{BuildSpec, BuildSystemKind, OptionValue, SourceSpec};
use crate::placeholder;
use crate::util::hash::ContentHash;

/// Read and validate a spec file.
pub fn load_spec(path: &Path) -> Result<BuildSpec, SpecError> {
  let content = std::fs::read_to_string(path).map_err(|source| SpecError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let spec = parse_spec(&content).map_err(|err| match err {
    SpecError::Parse { message, .. } => SpecError::Parse {
      path: Some(path.to_path_buf()),
      message,
    },
    other => other,
  })?;
  debug!(path = %path.display(), name = %spec.name, "loaded spec");
  Ok(spec)
}

/// Parse and validate spec text.
pub fn parse_spec(content: &str) -> Result<BuildSpec, SpecError> {
  let spec: BuildSpec = toml::from_str(content).map_err(|e| SpecError::Parse {
    path: None,
    message: e.to_string(),
  })?;
  validate(&spec)?;
  Ok(spec)
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> SpecError {
  SpecError::Invalid {
    field: field.into(),
    message: message.into(),
  }
}

/// Check everything serde cannot: cross references, value kinds, path
/// shapes and placeholder syntax.
pub fn validate(spec: &BuildSpec) -> Result<(), SpecError> {
  if spec.name.trim().is_empty() {
    return Err(invalid("name", "must not be empty"));
  }
  if spec.version.trim().is_empty() {
    return Err(invalid("version", "must not be empty"));
  }

  validate_source(&spec.source, "source")?;

  for (i, patch) in spec.patches.iter().enumerate() {
    if patch.path().is_empty() {
      return Err(invalid(format!("patches[{i}]"), "path must not be empty"));
    }
  }

  for (name, option) in &spec.options {
    let field = format!("options.{name}");
    match &option.default {
      OptionValue::Bool(_) if !option.choices.is_empty() => {
        return Err(invalid(field, "choices are only allowed on string options"));
      }
      OptionValue::String(value) if !option.choices.is_empty() && !option.choices.contains(value) => {
        return Err(invalid(field, format!("default '{value}' is not one of the choices")));
      }
      _ => {}
    }
    for other in &option.conflicts {
      if !spec.options.contains_key(other) {
        return Err(invalid(field, format!("conflicts with unknown option '{other}'")));
      }
      if other == name {
        return Err(invalid(field, "cannot conflict with itself"));
      }
    }
  }

  let mut dep_names = BTreeSet::new();
  for dep in &spec.dependencies {
    if !dep_names.insert(dep.name.as_str()) {
      return Err(invalid("dependencies", format!("duplicate dependency '{}'", dep.name)));
    }
  }

  for (i, fragment) in spec.conditional.iter().enumerate() {
    let field = format!("conditional[{i}].when");
    let when = &fragment.when;
    if when.os.is_none() && when.arch.is_none() && when.option.is_none() {
      return Err(invalid(field, "needs at least one of os, arch or option"));
    }
    if when.equals.is_some() && when.option.is_none() {
      return Err(invalid(field, "'equals' requires 'option'"));
    }
    if let Some(name) = &when.option {
      let option = spec
        .options
        .get(name)
        .ok_or_else(|| invalid(field.clone(), format!("unknown option '{name}'")))?;
      if let Some(expected) = &when.equals
        && !expected.same_kind(&option.default)
      {
        return Err(invalid(field, format!("'equals' has the wrong type for option '{name}'")));
      }
    }
  }

  let build = &spec.build;
  match build.system {
    BuildSystemKind::Custom => {
      if build.install.is_empty() {
        return Err(invalid("build.install", "custom builds must declare install commands"));
      }
    }
    BuildSystemKind::Cmake | BuildSystemKind::Make => {
      if !build.configure.is_empty() || !build.compile.is_empty() || !build.install.is_empty() {
        return Err(invalid(
          "build",
          "configure/build/install command lists are only allowed with system = \"custom\"",
        ));
      }
    }
  }
  if let Some(subdir) = &build.source_subdir {
    check_relative(subdir, "build.source_subdir")?;
  }

  for (name, rel) in &spec.outputs {
    check_relative(rel, &format!("outputs.{name}"))?;
  }

  if spec.check.command.is_empty() {
    return Err(invalid("check.command", "must not be empty"));
  }

  for (name, variant) in &spec.variants {
    for option in variant.options.keys() {
      let base = spec
        .options
        .get(option)
        .ok_or_else(|| invalid(format!("variants.{name}.options"), format!("unknown option '{option}'")))?;
      if !variant.options[option].same_kind(&base.default) {
        return Err(invalid(
          format!("variants.{name}.options.{option}"),
          "value has the wrong type",
        ));
      }
    }
  }

  if let Some(shell) = &spec.shell {
    let names: BTreeSet<&str> = shell.dependencies.iter().map(|d| d.name.as_str()).collect();
    for (var, composition) in &shell.compose {
      for from in &composition.from {
        if !names.contains(from.as_str()) {
          return Err(invalid(
            format!("shell.compose.{var}"),
            format!("unknown shell dependency '{from}'"),
          ));
        }
      }
    }
  }

  validate_placeholders(spec)
}

fn validate_source(source: &SourceSpec, field: &str) -> Result<(), SpecError> {
  if source.location().is_none() {
    return Err(invalid(field, "exactly one of github, url or path must be set"));
  }
  if ContentHash::parse(&source.sha256).is_none() {
    return Err(invalid(
      format!("{field}.sha256"),
      "must be 64 hex characters, optionally prefixed with 'sha256:'",
    ));
  }
  for (i, sub) in source.sub_sources.iter().enumerate() {
    let sub_field = format!("{field}.sub_sources[{i}]");
    check_relative(&sub.dest, &format!("{sub_field}.dest"))?;
    validate_source(&sub.source, &sub_field)?;
  }
  Ok(())
}

/// Reject absolute paths and `..` so nothing escapes its root.
fn check_relative(path: &str, field: &str) -> Result<(), SpecError> {
  let ok = Path::new(path)
    .components()
    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
  if ok && !path.is_empty() {
    Ok(())
  } else {
    Err(invalid(field, format!("'{path}' must be a relative path inside the tree")))
  }
}

fn validate_placeholders(spec: &BuildSpec) -> Result<(), SpecError> {
  let mut values: Vec<(&str, &str)> = Vec::new();
  for flag in &spec.build.flags {
    values.push(("build.flags", flag));
  }
  for value in spec.build.env.values() {
    values.push(("build.env", value));
  }
  for cmd in spec.build.configure.iter().chain(&spec.build.compile).chain(&spec.build.install) {
    values.push(("build", cmd));
  }
  for arg in &spec.check.command {
    values.push(("check.command", arg));
  }
  for fragment in &spec.conditional {
    for flag in &fragment.flags {
      values.push(("conditional.flags", flag));
    }
    for value in fragment.env.values() {
      values.push(("conditional.env", value));
    }
  }
  for variant in spec.variants.values() {
    for flag in &variant.flags {
      values.push(("variants.flags", flag));
    }
  }

  for (field, value) in values {
    placeholder::parse(value).map_err(|e| invalid(field, format!("'{value}': {e}")))?;
  }
  Ok(())
}
