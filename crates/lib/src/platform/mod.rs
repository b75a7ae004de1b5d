//! Host platform facts.
//!
//! Everything the pipeline needs to know about the machine it runs on is
//! gathered once into [`HostFacts`]: the platform pair, the executable search
//! path and the install prefixes searched for libraries. Tests construct
//! `HostFacts` directly instead of detecting them.

pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;
use std::path::{Path, PathBuf};

use arch::Arch;
use os::Os;
use serde::{Deserialize, Serialize};

/// Platform identifier combining architecture and OS (e.g., "aarch64-darwin")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// Returns the platform triple string (e.g., "aarch64-darwin")
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported host platform: {os}-{arch}")]
pub struct UnsupportedPlatform {
  pub os: &'static str,
  pub arch: &'static str,
}

/// Facts about the host that option and dependency resolution depend on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
  pub platform: Platform,
  /// Directories searched for tool executables, in priority order.
  pub search_path: Vec<PathBuf>,
  /// Install prefixes searched for libraries (`<prefix>/lib`, `<prefix>/include`).
  pub prefixes: Vec<PathBuf>,
}

impl HostFacts {
  /// Detect facts from the running process environment.
  ///
  /// `PATH` provides the search path. `PINBUILD_PREFIXES` (a path list)
  /// replaces the default prefixes; otherwise the parents of `bin`
  /// directories on `PATH` are used, followed by the conventional system
  /// prefixes.
  pub fn detect() -> Result<Self, UnsupportedPlatform> {
    let platform = Platform::current().ok_or(UnsupportedPlatform {
      os: std::env::consts::OS,
      arch: std::env::consts::ARCH,
    })?;

    let search_path: Vec<PathBuf> = std::env::var_os("PATH")
      .map(|p| std::env::split_paths(&p).filter(|d| !d.as_os_str().is_empty()).collect())
      .unwrap_or_default();

    let prefixes = match std::env::var_os("PINBUILD_PREFIXES") {
      Some(list) => std::env::split_paths(&list).collect(),
      None => default_prefixes(&search_path, platform.os),
    };

    Ok(Self {
      platform,
      search_path,
      prefixes,
    })
  }

  /// Locate an executable by name on the search path.
  pub fn find_executable(&self, name: &str) -> Option<PathBuf> {
    for dir in &self.search_path {
      for candidate in executable_candidates(dir, name, self.platform.os) {
        if is_executable_file(&candidate) {
          return Some(candidate);
        }
      }
    }
    None
  }
}

fn default_prefixes(search_path: &[PathBuf], os: Os) -> Vec<PathBuf> {
  let mut prefixes: Vec<PathBuf> = Vec::new();
  let mut push = |p: PathBuf| {
    if !prefixes.contains(&p) {
      prefixes.push(p);
    }
  };

  for dir in search_path {
    if dir.file_name().is_some_and(|n| n == "bin")
      && let Some(parent) = dir.parent()
    {
      push(parent.to_path_buf());
    }
  }

  match os {
    Os::Linux => {
      push(PathBuf::from("/usr/local"));
      push(PathBuf::from("/usr"));
    }
    Os::MacOs => {
      push(PathBuf::from("/opt/homebrew"));
      push(PathBuf::from("/usr/local"));
      push(PathBuf::from("/usr"));
    }
    Os::Windows => {}
  }

  prefixes
}

fn executable_candidates(dir: &Path, name: &str, os: Os) -> Vec<PathBuf> {
  match os {
    Os::Windows => vec![dir.join(format!("{name}.exe")), dir.join(name)],
    _ => vec![dir.join(name)],
  }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;
  std::fs::metadata(path)
    .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
    .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
  path.is_file()
}
