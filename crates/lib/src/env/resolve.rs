//! Locating declared dependencies on the host.

use std::path::{Path, PathBuf};

use semver::Version;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::platform::HostFacts;
use crate::process::{ProcessCommand, ProcessRunner};
use crate::spec::{Dependency, DependencyKind};

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("{kind:?} '{name}' not found (searched {searched})")]
  NotFound {
    name: String,
    kind: DependencyKind,
    searched: String,
  },

  #[error("'{name}' version {found} does not satisfy {required}")]
  VersionMismatch {
    name: String,
    found: Version,
    required: String,
  },

  #[error("could not determine the version of '{name}' (requires {required}); output: {output}")]
  VersionUnknown {
    name: String,
    required: String,
    output: String,
  },

  #[error("failed to query the version of '{name}': {source}")]
  VersionQuery {
    name: String,
    #[source]
    source: std::io::Error,
  },
}

impl ResolveError {
  /// Name of the dependency that failed to resolve.
  pub fn dependency(&self) -> &str {
    match self {
      ResolveError::NotFound { name, .. }
      | ResolveError::VersionMismatch { name, .. }
      | ResolveError::VersionUnknown { name, .. }
      | ResolveError::VersionQuery { name, .. } => name,
    }
  }
}

/// A dependency located on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDependency {
  pub name: String,
  pub kind: DependencyKind,
  /// Install prefix: the parent of the tool's `bin` directory, or the
  /// prefix the library was found under.
  pub prefix: PathBuf,
  /// The executable, library file or pkg-config file that was found.
  pub path: PathBuf,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<Version>,
}

impl ResolvedDependency {
  /// Directory added to `PATH` for a tool.
  pub fn bin_dir(&self) -> Option<&Path> {
    match self.kind {
      DependencyKind::Tool => self.path.parent(),
      DependencyKind::Library => None,
    }
  }

  /// Directory added to the loader path for a library.
  pub fn lib_dir(&self) -> Option<&Path> {
    match self.kind {
      DependencyKind::Library => self.path.parent().filter(|p| !p.ends_with("pkgconfig")),
      DependencyKind::Tool => None,
    }
  }
}

/// Concrete locations of every active dependency, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedEnvironment {
  pub entries: Vec<ResolvedDependency>,
}

impl ResolvedEnvironment {
  pub fn get(&self, name: &str) -> Option<&ResolvedDependency> {
    self.entries.iter().find(|e| e.name == name)
  }

  /// Tool directories, deduplicated, in declaration order.
  pub fn bin_dirs(&self) -> Vec<PathBuf> {
    dedup(self.entries.iter().filter_map(ResolvedDependency::bin_dir))
  }

  /// Library directories, deduplicated, in declaration order.
  pub fn lib_dirs(&self) -> Vec<PathBuf> {
    dedup(self.entries.iter().filter_map(ResolvedDependency::lib_dir))
  }
}

fn dedup<'a>(dirs: impl Iterator<Item = &'a Path>) -> Vec<PathBuf> {
  let mut out: Vec<PathBuf> = Vec::new();
  for dir in dirs {
    if !out.iter().any(|d| d == dir) {
      out.push(dir.to_path_buf());
    }
  }
  out
}

/// Locate each dependency on the host, in order, failing on the first one
/// that is absent or too old.
///
/// Tools are found on the search path; when a minimum version is declared
/// the tool is run with its version arguments through `runner`. Libraries
/// are found under the host prefixes, with the version read from a
/// pkg-config file when one exists.
pub async fn resolve_environment<R: ProcessRunner>(
  dependencies: &[Dependency],
  host: &HostFacts,
  runner: &R,
) -> Result<ResolvedEnvironment, ResolveError> {
  // Lookups come first so an absent dependency is reported before any
  // version query runs.
  let mut located = Vec::with_capacity(dependencies.len());
  for dep in dependencies {
    let found = match dep.kind {
      DependencyKind::Tool => locate_tool(dep, host)?,
      DependencyKind::Library => locate_library(dep, host)?,
    };
    located.push((dep, found));
  }

  let mut entries = Vec::with_capacity(located.len());
  for (dep, mut found) in located {
    if let Some(required) = &dep.min_version {
      if found.version.is_none() && dep.kind == DependencyKind::Tool {
        found.version = query_tool_version(dep, &found.path, runner).await?;
      }
      match &found.version {
        Some(version) if required.matches(version) => {}
        Some(version) => {
          return Err(ResolveError::VersionMismatch {
            name: dep.name.clone(),
            found: version.clone(),
            required: required.to_string(),
          });
        }
        None => {
          return Err(ResolveError::VersionUnknown {
            name: dep.name.clone(),
            required: required.to_string(),
            output: "no version information found".to_string(),
          });
        }
      }
    }
    debug!(name = %found.name, path = %found.path.display(), version = ?found.version, "resolved dependency");
    entries.push(found);
  }

  Ok(ResolvedEnvironment { entries })
}

fn locate_tool(dep: &Dependency, host: &HostFacts) -> Result<ResolvedDependency, ResolveError> {
  let path = host
    .find_executable(dep.lookup_name())
    .ok_or_else(|| ResolveError::NotFound {
      name: dep.name.clone(),
      kind: dep.kind,
      searched: describe(&host.search_path),
    })?;

  let bin_dir = path.parent().unwrap_or(Path::new("/"));
  let prefix = if bin_dir.ends_with("bin") {
    bin_dir.parent().unwrap_or(bin_dir)
  } else {
    bin_dir
  };

  Ok(ResolvedDependency {
    name: dep.name.clone(),
    kind: dep.kind,
    prefix: prefix.to_path_buf(),
    path,
    version: None,
  })
}

fn locate_library(dep: &Dependency, host: &HostFacts) -> Result<ResolvedDependency, ResolveError> {
  let stem = dep.lookup_name();
  let stem = stem.strip_prefix("lib").unwrap_or(stem);
  let suffixes = host.platform.os.library_suffixes();
  let multiarch = format!("lib/{}-linux-gnu", host.platform.arch);

  for prefix in &host.prefixes {
    let pc = ["lib/pkgconfig", "lib64/pkgconfig", "share/pkgconfig"]
      .iter()
      .map(|dir| prefix.join(dir).join(format!("{}.pc", dep.lookup_name())))
      .find(|p| p.is_file());

    for lib_dir in ["lib", "lib64", multiarch.as_str()] {
      let dir = prefix.join(lib_dir);
      if let Some(file) = find_library_file(&dir, stem, suffixes) {
        return Ok(ResolvedDependency {
          name: dep.name.clone(),
          kind: dep.kind,
          prefix: prefix.clone(),
          path: file,
          version: pc.as_deref().and_then(read_pc_version),
        });
      }
    }

    // header-only or pkg-config-only installs
    if let Some(pc) = pc {
      return Ok(ResolvedDependency {
        name: dep.name.clone(),
        kind: dep.kind,
        prefix: prefix.clone(),
        version: read_pc_version(&pc),
        path: pc,
      });
    }
  }

  Err(ResolveError::NotFound {
    name: dep.name.clone(),
    kind: dep.kind,
    searched: describe(&host.prefixes),
  })
}

fn find_library_file(dir: &Path, stem: &str, suffixes: &[&str]) -> Option<PathBuf> {
  let entries = std::fs::read_dir(dir).ok()?;
  let mut names: Vec<String> = entries
    .filter_map(Result::ok)
    .filter_map(|e| e.file_name().to_str().map(str::to_string))
    .collect();
  names.sort();

  for suffix in suffixes {
    let exact = format!("lib{stem}.{suffix}");
    let versioned = format!("{exact}.");
    if let Some(name) = names.iter().find(|n| **n == exact || n.starts_with(&versioned)) {
      return Some(dir.join(name));
    }
  }
  None
}

fn read_pc_version(pc: &Path) -> Option<Version> {
  let content = std::fs::read_to_string(pc).ok()?;
  content
    .lines()
    .find_map(|line| line.strip_prefix("Version:"))
    .and_then(|v| extract_version(v.trim()))
}

async fn query_tool_version<R: ProcessRunner>(
  dep: &Dependency,
  path: &Path,
  runner: &R,
) -> Result<Option<Version>, ResolveError> {
  let cwd = path.parent().unwrap_or(Path::new("/"));
  let command = ProcessCommand::new(path.to_string_lossy(), cwd)
    .args(dep.version_args())
    .env("PATH", cwd.to_string_lossy());

  let output = runner.run(&command).await.map_err(|source| ResolveError::VersionQuery {
    name: dep.name.clone(),
    source,
  })?;

  let version = extract_version(&output.stdout).or_else(|| extract_version(&output.stderr));
  if version.is_none() {
    return Err(ResolveError::VersionUnknown {
      name: dep.name.clone(),
      required: dep.min_version.as_ref().map(|r| r.to_string()).unwrap_or_default(),
      output: output.tail(),
    });
  }
  Ok(version)
}

/// Find the first dotted version number in free-form tool output.
///
/// Missing components are filled with zero (`3.28` becomes `3.28.0`) and
/// anything after the numeric part is ignored (`2024.1-dev`).
pub fn extract_version(text: &str) -> Option<Version> {
  for token in text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-')) {
    let token = token.trim_start_matches(['v', 'V']);
    let numeric: String = token
      .chars()
      .take_while(|c| c.is_ascii_digit() || *c == '.')
      .collect();
    let parts: Vec<&str> = numeric.split('.').filter(|p| !p.is_empty()).collect();
    if parts.len() < 2 || !numeric.starts_with(|c: char| c.is_ascii_digit()) {
      continue;
    }
    let nums: Option<Vec<u64>> = parts.iter().take(3).map(|p| p.parse().ok()).collect();
    if let Some(nums) = nums {
      return Some(Version::new(
        nums[0],
        nums.get(1).copied().unwrap_or(0),
        nums.get(2).copied().unwrap_or(0),
      ));
    }
  }
  None
}

fn describe(dirs: &[PathBuf]) -> String {
  if dirs.is_empty() {
    "nothing: search list is empty".to_string()
  } else {
    dirs.iter().map(|d| d.display().to_string()).collect::<Vec<_>>().join(", ")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::Platform;
  use crate::platform::arch::Arch;
  use crate::platform::os::Os;
  use crate::process::{ProcessOutput, RecordingRunner};
  use crate::util::testutil::write_tree;
  use tempfile::TempDir;

  fn dep(name: &str, kind: DependencyKind, min: Option<&str>) -> Dependency {
    Dependency {
      name: name.to_string(),
      kind,
      min_version: min.map(|m| semver::VersionReq::parse(m).unwrap()),
      version_args: None,
      lookup: None,
      platforms: vec![],
    }
  }

  fn host(search: Vec<PathBuf>, prefixes: Vec<PathBuf>) -> HostFacts {
    HostFacts {
      platform: Platform::new(Arch::X86_64, Os::Linux),
      search_path: search,
      prefixes,
    }
  }

  #[test]
  fn extract_version_from_tool_output() {
    assert_eq!(extract_version("cmake version 3.28.3\n"), Some(Version::new(3, 28, 3)));
    assert_eq!(extract_version("shaderc v2024.1-dev"), Some(Version::new(2024, 1, 0)));
    assert_eq!(extract_version("Python 3.12"), Some(Version::new(3, 12, 0)));
    assert_eq!(extract_version("glslc 1 only"), None);
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn resolves_tool_and_checks_minimum_version() {
    let temp = TempDir::new().unwrap();
    let bin = temp.path().join("bin");
    crate::util::testutil::write_script(&bin.join("cmake"), "echo unused");

    let runner = RecordingRunner::with_handler(|_| ProcessOutput::success("cmake version 3.28.3\n"));
    let facts = host(vec![bin.clone()], vec![]);

    let env = resolve_environment(&[dep("cmake", DependencyKind::Tool, Some(">=3.17"))], &facts, &runner)
      .await
      .unwrap();

    assert_eq!(env.entries[0].prefix, temp.path());
    assert_eq!(env.entries[0].version, Some(Version::new(3, 28, 3)));
    assert_eq!(env.bin_dirs(), vec![bin.clone()]);
    assert_eq!(runner.calls()[0].args, vec!["--version"]);

    let too_new = resolve_environment(&[dep("cmake", DependencyKind::Tool, Some(">=4"))], &facts, &runner).await;
    assert!(matches!(too_new, Err(ResolveError::VersionMismatch { .. })));
  }

  #[tokio::test]
  async fn missing_tool_fails_before_any_version_query() {
    let runner = RecordingRunner::new();
    let deps = [
      dep("cmake", DependencyKind::Tool, Some(">=3.17")),
      dep("python3", DependencyKind::Tool, None),
    ];
    let err = resolve_environment(&deps, &host(vec![], vec![]), &runner).await.unwrap_err();

    assert_eq!(err.dependency(), "cmake");
    assert!(runner.calls().is_empty());
  }

  #[tokio::test]
  async fn resolves_library_with_pkg_config_version() {
    let temp = TempDir::new().unwrap();
    write_tree(
      temp.path(),
      &[
        ("lib/libvulkan.so.1", ""),
        ("lib/pkgconfig/vulkan.pc", "Name: Vulkan-Loader\nVersion: 1.3.280\n"),
      ],
    );
    let mut vulkan = dep("vulkan-loader", DependencyKind::Library, Some(">=1.3"));
    vulkan.lookup = Some("vulkan".to_string());

    let runner = RecordingRunner::new();
    let env = resolve_environment(&[vulkan], &host(vec![], vec![temp.path().to_path_buf()]), &runner)
      .await
      .unwrap();

    let entry = env.get("vulkan-loader").unwrap();
    assert_eq!(entry.path, temp.path().join("lib/libvulkan.so.1"));
    assert_eq!(entry.version, Some(Version::new(1, 3, 280)));
    assert_eq!(env.lib_dirs(), vec![temp.path().join("lib")]);
    assert!(runner.calls().is_empty());
  }

  #[tokio::test]
  async fn library_searches_prefixes_in_order() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write_tree(first.path(), &[("lib/libz.a", "")]);
    write_tree(second.path(), &[("lib/libz.so", "")]);

    let facts = host(vec![], vec![first.path().to_path_buf(), second.path().to_path_buf()]);
    let env = resolve_environment(&[dep("z", DependencyKind::Library, None)], &facts, &RecordingRunner::new())
      .await
      .unwrap();

    assert_eq!(env.entries[0].prefix, first.path());
  }
}
