//! Implementation of the `pinbuild hash` command.
//!
//! Computes the content hash a spec pins a source tree with. Archives are
//! unpacked first, the same way fetching does, so the printed value can be
//! pasted into `source.sha256` as is.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use pinbuild_lib::fetch::archive::{ArchiveKind, unpack};
use pinbuild_lib::util::hash::{ContentHash, hash_directory};

use crate::output::print_json;

#[derive(Serialize)]
struct HashOutput<'a> {
  path: &'a Path,
  sha256: ContentHash,
}

pub fn cmd_hash(path: &Path, json: bool) -> Result<()> {
  let sha256 = if path.is_dir() {
    hash_directory(path, &[]).with_context(|| format!("Failed to hash {}", path.display()))?
  } else if path.is_file() {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let Some(kind) = ArchiveKind::detect(name) else {
      bail!("{} is neither a directory nor a .tar/.tar.gz archive", path.display());
    };
    let temp = tempfile::tempdir().context("Failed to create temporary directory")?;
    let tree = temp.path().join("tree");
    unpack(path, kind, &tree).with_context(|| format!("Failed to unpack {}", path.display()))?;
    hash_directory(&tree, &[]).with_context(|| format!("Failed to hash {}", path.display()))?
  } else {
    bail!("{} does not exist", path.display());
  };

  if json {
    return print_json(&HashOutput { path, sha256 });
  }
  println!("{sha256}");
  Ok(())
}
