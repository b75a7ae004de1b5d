//! Test helpers for building fixture trees, archives and fake tools.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::util::hash::{ContentHash, hash_directory};

/// Write `files` (relative path, contents) under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (rel, contents) in files {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
  }
}

/// Hash a fixture tree the same way fetched sources are hashed.
pub fn tree_hash(root: &Path) -> ContentHash {
  hash_directory(root, &[]).unwrap()
}

/// Pack `src` into a `.tar.gz` whose entries live under `top/`, the way
/// GitHub archives are laid out.
pub fn make_tar_gz(src: &Path, top: &str, dest: &Path) -> PathBuf {
  let file = fs::File::create(dest).unwrap();
  let encoder = GzEncoder::new(file, Compression::default());
  let mut builder = tar::Builder::new(encoder);
  builder.append_dir_all(top, src).unwrap();
  builder.into_inner().unwrap().finish().unwrap();
  dest.to_path_buf()
}

/// Write an executable shell script at `path`.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
  use std::os::unix::fs::PermissionsExt;

  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
  fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}
