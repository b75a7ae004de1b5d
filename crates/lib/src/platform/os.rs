use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating system variants a spec can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
  Linux,
  #[serde(rename = "darwin", alias = "macos")]
  MacOs,
  Windows,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Parse an OS name as written in spec files (`darwin` and `macos` are equivalent)
  pub fn parse(name: &str) -> Option<Self> {
    match name.to_ascii_lowercase().as_str() {
      "linux" => Some(Self::Linux),
      "darwin" | "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }

  /// Name of the dynamic loader search path variable on this OS
  pub fn library_path_var(&self) -> &'static str {
    match self {
      Self::Linux => "LD_LIBRARY_PATH",
      Self::MacOs => "DYLD_LIBRARY_PATH",
      Self::Windows => "PATH",
    }
  }

  /// File name suffixes of shared and static libraries, most preferred first
  pub fn library_suffixes(&self) -> &'static [&'static str] {
    match self {
      Self::Linux => &["so", "a"],
      Self::MacOs => &["dylib", "a"],
      Self::Windows => &["dll", "lib"],
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
