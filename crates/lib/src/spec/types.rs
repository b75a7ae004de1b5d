use std::collections::BTreeMap;
use std::fmt;

use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::platform::arch::Arch;
use crate::platform::os::Os;

/// A declarative description of one native build.
///
/// Loaded from TOML; every field that can influence the produced artifact
/// participates in the plan hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
  pub name: String,
  /// Version the install check must observe.
  pub version: String,
  pub source: SourceSpec,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub patches: Vec<PatchSpec>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub options: BTreeMap<String, OptionSpec>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dependencies: Vec<Dependency>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub conditional: Vec<Conditional>,
  pub build: BuildSystemSpec,
  /// Output name to path relative to the install prefix.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub outputs: BTreeMap<String, String>,
  pub check: CheckSpec,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub variants: BTreeMap<String, Variant>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub shell: Option<ShellSpec>,
}

/// Pinned source location. Exactly one of `github`, `url` or `path` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub github: Option<GithubRef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  /// Tree hash of the unpacked source, sub-sources excluded.
  pub sha256: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub sub_sources: Vec<SubSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubRef {
  pub owner: String,
  pub repo: String,
  /// Tag or commit.
  pub rev: String,
}

/// A source unpacked inside its parent at `dest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubSource {
  pub dest: String,
  #[serde(flatten)]
  pub source: SourceSpec,
}

/// Where a source comes from, once validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation<'a> {
  Github(&'a GithubRef),
  Url(&'a str),
  Path(&'a str),
}

impl SourceSpec {
  /// The single configured location, or `None` if zero or several are set.
  pub fn location(&self) -> Option<SourceLocation<'_>> {
    match (&self.github, &self.url, &self.path) {
      (Some(gh), None, None) => Some(SourceLocation::Github(gh)),
      (None, Some(url), None) => Some(SourceLocation::Url(url)),
      (None, None, Some(path)) => Some(SourceLocation::Path(path)),
      _ => None,
    }
  }
}

impl GithubRef {
  pub fn archive_url(&self) -> String {
    format!(
      "https://github.com/{}/{}/archive/{}.tar.gz",
      self.owner, self.repo, self.rev
    )
  }
}

impl fmt::Display for SourceLocation<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceLocation::Github(gh) => write!(f, "github:{}/{}@{}", gh.owner, gh.repo, gh.rev),
      SourceLocation::Url(url) => write!(f, "{url}"),
      SourceLocation::Path(path) => write!(f, "path:{path}"),
    }
  }
}

/// A patch file, either as a bare path or with an explicit strip level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchSpec {
  Path(String),
  Detailed {
    path: String,
    #[serde(default = "default_strip")]
    strip: usize,
  },
}

fn default_strip() -> usize {
  1
}

impl PatchSpec {
  pub fn path(&self) -> &str {
    match self {
      PatchSpec::Path(path) => path,
      PatchSpec::Detailed { path, .. } => path,
    }
  }

  pub fn strip(&self) -> usize {
    match self {
      PatchSpec::Path(_) => default_strip(),
      PatchSpec::Detailed { strip, .. } => *strip,
    }
  }
}

/// A boolean or string option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
  Bool(bool),
  String(String),
}

impl OptionValue {
  /// Truthiness used by conditions without `equals`.
  pub fn is_enabled(&self) -> bool {
    match self {
      OptionValue::Bool(b) => *b,
      OptionValue::String(s) => !s.is_empty(),
    }
  }

  pub fn same_kind(&self, other: &OptionValue) -> bool {
    matches!(
      (self, other),
      (OptionValue::Bool(_), OptionValue::Bool(_)) | (OptionValue::String(_), OptionValue::String(_))
    )
  }
}

impl fmt::Display for OptionValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionValue::Bool(b) => write!(f, "{b}"),
      OptionValue::String(s) => write!(f, "{s}"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
  pub default: OptionValue,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Allowed values for string options. Empty means unrestricted.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub choices: Vec<String>,
  /// Options that must not be enabled together with this one.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
  /// An executable located on the search path.
  #[default]
  Tool,
  /// A library located under one of the host prefixes.
  Library,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
  pub name: String,
  #[serde(default)]
  pub kind: DependencyKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_version: Option<VersionReq>,
  /// Arguments passed to a tool to print its version.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version_args: Option<Vec<String>>,
  /// Name searched on the host when it differs from `name`: the executable
  /// for tools, the library stem (`vulkan` for `libvulkan.so`) or
  /// pkg-config module for libraries.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lookup: Option<String>,
  /// Operating systems the dependency applies to. Empty means all.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub platforms: Vec<Os>,
}

impl Dependency {
  pub fn lookup_name(&self) -> &str {
    self.lookup.as_deref().unwrap_or(&self.name)
  }

  pub fn version_args(&self) -> Vec<String> {
    self
      .version_args
      .clone()
      .unwrap_or_else(|| vec!["--version".to_string()])
  }

  pub fn applies_to(&self, os: Os) -> bool {
    self.platforms.is_empty() || self.platforms.contains(&os)
  }
}

/// A fragment active only when its condition holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditional {
  pub when: Condition,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dependencies: Vec<Dependency>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub flags: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
}

/// All set fields must match. An `option` without `equals` matches when the
/// option is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub os: Option<Os>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub arch: Option<Arch>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub option: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub equals: Option<OptionValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystemKind {
  Cmake,
  /// Autotools-style `configure && make && make install`.
  Make,
  /// Shell command lists per phase.
  Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSystemSpec {
  pub system: BuildSystemKind,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub flags: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
  /// Directory inside the source tree holding the build files.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_subdir: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub configure: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "build")]
  pub compile: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub install: Vec<String>,
}

/// Post-install verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
  /// argv; the first element may be a path relative to the install prefix.
  pub command: Vec<String>,
  #[serde(default)]
  pub expect_exit: i32,
  /// Require the declared version in stdout or stderr.
  #[serde(default = "default_true")]
  pub expect_version: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expect_output: Option<String>,
}

fn default_true() -> bool {
  true
}

/// A named overlay over the base spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Replaces the base patch list when set.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub patches: Option<Vec<PatchSpec>>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dependencies: Vec<Dependency>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub flags: Vec<String>,
  /// Option default overrides.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub options: BTreeMap<String, OptionValue>,
}

/// Development shell requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellSpec {
  #[serde(default)]
  pub dependencies: Vec<Dependency>,
  /// Extra variables composed from dependency prefixes.
  #[serde(default)]
  pub compose: BTreeMap<String, Composition>,
  /// Literal variables.
  #[serde(default)]
  pub set: BTreeMap<String, String>,
  /// Prepend the built artifact's `bin` to `PATH`.
  #[serde(default)]
  pub include_artifact: bool,
}

/// A variable built from `<prefix>/<subpath>` of selected dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
  pub subpath: String,
  /// Dependency names to draw from. Empty means every shell dependency.
  #[serde(default)]
  pub from: Vec<String>,
}
