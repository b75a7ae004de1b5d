//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Placeholder in fixture specs replaced with the source tree's hash.
const PIN_PLACEHOLDER: &str = "@SHA256@";

/// Get path to a fixture file or directory.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Raw content of a fixture file.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

fn copy_dir(src: &Path, dest: &Path) {
  std::fs::create_dir_all(dest).unwrap();
  for entry in std::fs::read_dir(src).unwrap() {
    let entry = entry.unwrap();
    let target = dest.join(entry.file_name());
    if entry.file_type().unwrap().is_dir() {
      copy_dir(&entry.path(), &target);
    } else {
      std::fs::copy(entry.path(), &target).unwrap();
    }
  }
}

/// Isolated test environment.
///
/// Each test gets its own project directory, store and download cache.
pub struct TestEnv {
  pub temp: TempDir,
  pub spec_path: PathBuf,
}

impl TestEnv {
  /// Copy a fixture project and pin its `src` tree.
  ///
  /// The spec's `@SHA256@` is replaced with the hash `pinbuild hash`
  /// reports for the copied sources.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    copy_dir(&fixture_path(name), &temp.path().join("project"));
    let env = Self {
      spec_path: temp.path().join("project").join("pinbuild.toml"),
      temp,
    };
    let template = std::fs::read_to_string(&env.spec_path).unwrap();
    env.write_spec(&template);
    env
  }

  pub fn project(&self) -> PathBuf {
    self.temp.path().join("project")
  }

  /// Overwrite the spec, pinning the current sources.
  pub fn write_spec(&self, template: &str) {
    let pin = self.source_hash();
    std::fs::write(&self.spec_path, template.replace(PIN_PLACEHOLDER, &pin)).unwrap();
  }

  /// Append TOML to the spec. Top-level keys must be added with
  /// [`TestEnv::write_spec`] since they would land in the last table.
  pub fn append_spec(&self, extra: &str) {
    let mut content = std::fs::read_to_string(&self.spec_path).unwrap();
    content.push('\n');
    content.push_str(extra);
    std::fs::write(&self.spec_path, content).unwrap();
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.project().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn source_hash(&self) -> String {
    let output = self.cmd().arg("hash").arg(self.project().join("src")).output().unwrap();
    assert!(output.status.success(), "hash failed: {output:?}");
    String::from_utf8(output.stdout).unwrap().trim().to_string()
  }

  /// Store path (isolated per test).
  pub fn store_path(&self) -> PathBuf {
    let p = self.temp.path().join("store");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Cache path for downloads.
  pub fn cache_path(&self) -> PathBuf {
    let p = self.temp.path().join("cache");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Number of completed artifacts in the store.
  pub fn artifact_count(&self) -> usize {
    std::fs::read_dir(self.store_path().join("build"))
      .map(|d| d.count())
      .unwrap_or(0)
  }

  /// Get a pre-configured Command for the pinbuild binary.
  ///
  /// Runs in the project directory with:
  /// - `PINBUILD_STORE`: isolated artifact store
  /// - `PINBUILD_CACHE`: isolated download cache
  /// - `NO_COLOR`: plain output for matching
  pub fn cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("pinbuild");
    cmd.current_dir(self.project());
    cmd.env("PINBUILD_STORE", self.store_path());
    cmd.env("PINBUILD_CACHE", self.cache_path());
    cmd.env("NO_COLOR", "1");
    cmd.env_remove("RUST_LOG");
    cmd
  }
}
