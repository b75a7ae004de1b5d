//! Well-known directories.
//!
//! Every location can be redirected through an environment variable so that
//! tests and CI runs stay isolated:
//!
//! - `PINBUILD_STORE`: artifact store (default `<data_dir>/store`)
//! - `PINBUILD_CACHE`: download cache root (default `<cache_dir>`)

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("/"))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|| home_dir().join("AppData").join("Roaming"))
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  if let Some(path) = std::env::var_os("PINBUILD_CACHE") {
    return PathBuf::from(path);
  }
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|| home_dir().join("AppData").join("Local"))
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  if let Some(path) = std::env::var_os("PINBUILD_CACHE") {
    return PathBuf::from(path);
  }
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Returns the artifact store root.
pub fn store_dir() -> PathBuf {
  if let Some(path) = std::env::var_os("PINBUILD_STORE") {
    return PathBuf::from(path);
  }
  data_dir().join("store")
}

/// Directory holding downloaded source archives, keyed by URL.
pub fn downloads_dir() -> PathBuf {
  cache_dir().join("downloads")
}
