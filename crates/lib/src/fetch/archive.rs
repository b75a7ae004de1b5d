//! Archive unpacking and local tree copies.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
  TarGz,
  Tar,
}

impl ArchiveKind {
  /// Detect from a file name or URL path, ignoring any query string.
  pub fn detect(name: &str) -> Option<Self> {
    let name = name.split(['?', '#']).next().unwrap_or(name);
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
      Some(ArchiveKind::TarGz)
    } else if name.ends_with(".tar") {
      Some(ArchiveKind::Tar)
    } else {
      None
    }
  }
}

/// Unpack `archive` into `dest`, dropping the single top-level directory
/// every source archive wraps its tree in.
///
/// Entries that would land outside `dest` are rejected.
pub fn unpack(archive: &Path, kind: ArchiveKind, dest: &Path) -> io::Result<()> {
  fs::create_dir_all(dest)?;
  let file = BufReader::new(File::open(archive)?);
  match kind {
    ArchiveKind::TarGz => unpack_entries(Archive::new(GzDecoder::new(file)), dest)?,
    ArchiveKind::Tar => unpack_entries(Archive::new(file), dest)?,
  }
  debug!(archive = %archive.display(), dest = %dest.display(), "unpacked");
  Ok(())
}

fn unpack_entries<R: Read>(mut archive: Archive<R>, dest: &Path) -> io::Result<()> {
  for entry in archive.entries()? {
    let mut entry = entry?;
    let path = entry.path()?.into_owned();

    let Some(stripped) = strip_top(&path)? else {
      continue;
    };
    let dest_path = dest.join(&stripped);
    if let Some(parent) = stripped.parent() {
      ensure_real_dirs(dest, parent, &path)?;
    }

    if entry.header().entry_type() == EntryType::Link {
      // hard links must point at an entry already unpacked inside `dest`
      let link = entry
        .link_name()?
        .ok_or_else(|| escapes(&path))?
        .into_owned();
      let target = strip_top(&link)?.ok_or_else(|| escapes(&path))?;
      if let Some(parent) = target.parent() {
        ensure_real_dirs(dest, parent, &path)?;
      }
      fs::hard_link(dest.join(target), &dest_path)?;
      continue;
    }
    entry.unpack(&dest_path)?;
  }
  Ok(())
}

/// Drop the top-level directory. `None` for the top directory itself.
fn strip_top(path: &Path) -> io::Result<Option<PathBuf>> {
  let mut components = path.components().filter(|c| *c != Component::CurDir);
  if !matches!(components.next(), Some(Component::Normal(_))) {
    return Err(escapes(path));
  }
  let stripped: PathBuf = components.collect();
  if stripped.as_os_str().is_empty() {
    return Ok(None);
  }
  if !stripped.components().all(|c| matches!(c, Component::Normal(_))) {
    return Err(escapes(path));
  }
  Ok(Some(stripped))
}

/// Create `rel` under `dest` one component at a time, refusing to pass
/// through anything that is not a real directory, symlinks included.
fn ensure_real_dirs(dest: &Path, rel: &Path, entry: &Path) -> io::Result<()> {
  let mut current = dest.to_path_buf();
  for component in rel.components() {
    current.push(component);
    match fs::symlink_metadata(&current) {
      Ok(meta) if meta.file_type().is_dir() => {}
      Ok(_) => return Err(escapes(entry)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(&current)?,
      Err(e) => return Err(e),
    }
  }
  Ok(())
}

fn escapes(path: &Path) -> io::Error {
  io::Error::new(
    io::ErrorKind::InvalidData,
    format!("archive entry escapes destination: {}", path.display()),
  )
}

/// Copy a directory tree, keeping permissions and symlinks.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      symlink(&link, &target)?;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target)?;
    }
  }
  Ok(())
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(link, target)
}

#[cfg(windows)]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(link, target)
}
