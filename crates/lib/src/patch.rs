//! Unified diff application.
//!
//! Patches are applied in list order. Each patch is atomic: every hunk of
//! every file is matched in memory first and files are only written once the
//! whole patch applies. A hunk may be found at an offset from the line it
//! declares but must match exactly (no fuzz), which keeps results
//! independent of the host `patch` binary.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::spec::PatchSpec;

#[derive(Debug, Error)]
pub enum PatchError {
  #[error("patch {patch} does not apply: {file} hunk #{hunk} at line {line}: {reason}")]
  Conflict {
    patch: PathBuf,
    file: String,
    hunk: usize,
    line: usize,
    reason: String,
  },

  #[error("failed to parse patch {patch} at line {line}: {message}")]
  Parse {
    patch: PathBuf,
    line: usize,
    message: String,
  },

  #[error("failed to read patch {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("patch target {path} is not UTF-8 text")]
  Encoding { path: PathBuf },

  #[error("I/O error applying patch to {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
  Context(String),
  Remove(String),
  Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
  old_start: usize,
  lines: Vec<Line>,
  /// The patched file must not end with a newline.
  new_no_newline: bool,
}

impl Hunk {
  fn old_lines(&self) -> Vec<&str> {
    self
      .lines
      .iter()
      .filter_map(|l| match l {
        Line::Context(s) | Line::Remove(s) => Some(s.as_str()),
        Line::Add(_) => None,
      })
      .collect()
  }

  fn new_lines(&self) -> Vec<String> {
    self
      .lines
      .iter()
      .filter_map(|l| match l {
        Line::Context(s) | Line::Add(s) => Some(s.clone()),
        Line::Remove(_) => None,
      })
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FilePatch {
  /// `None` for `/dev/null`.
  old_path: Option<String>,
  new_path: Option<String>,
  hunks: Vec<Hunk>,
}

impl FilePatch {
  fn target(&self) -> &str {
    self.new_path.as_deref().or(self.old_path.as_deref()).unwrap_or("")
  }
}

/// Apply `patches` to the tree at `root`, in order.
///
/// Patch paths are relative to `base_dir`.
pub fn apply_patches(root: &Path, patches: &[PatchSpec], base_dir: &Path) -> Result<(), PatchError> {
  for spec in patches {
    let path = base_dir.join(spec.path());
    let text = std::fs::read_to_string(&path).map_err(|source| PatchError::Read {
      path: path.clone(),
      source,
    })?;
    apply_patch(root, &path, &text, spec.strip())?;
  }
  if !patches.is_empty() {
    info!(count = patches.len(), "patches applied");
  }
  Ok(())
}

/// Apply one patch atomically. `patch_path` is used for error reports.
pub fn apply_patch(root: &Path, patch_path: &Path, text: &str, strip: usize) -> Result<(), PatchError> {
  let files = parse(patch_path, text, strip)?;

  // path -> new contents (None deletes)
  let mut staged: BTreeMap<PathBuf, Option<String>> = BTreeMap::new();

  for file in &files {
    let target = file.target().to_string();
    let conflict = |hunk: usize, line: usize, reason: &str| PatchError::Conflict {
      patch: patch_path.to_path_buf(),
      file: target.clone(),
      hunk,
      line,
      reason: reason.to_string(),
    };

    let read_path = root.join(file.old_path.as_deref().unwrap_or(&target));
    let original = match &file.old_path {
      None => {
        if read_path.exists() {
          return Err(conflict(1, 1, "file to be created already exists"));
        }
        String::new()
      }
      Some(_) => match staged.get(&read_path) {
        Some(Some(content)) => content.clone(),
        Some(None) => return Err(conflict(1, 1, "file was deleted earlier in this patch")),
        None => match std::fs::read(&read_path) {
          Ok(bytes) => String::from_utf8(bytes).map_err(|_| PatchError::Encoding { path: read_path.clone() })?,
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(conflict(1, 1, "file does not exist")),
          Err(source) => {
            return Err(PatchError::Io {
              path: read_path.clone(),
              source,
            });
          }
        },
      },
    };

    let eol = line_ending(&original);
    let had_newline = original.is_empty() || original.ends_with('\n');
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
    let mut search_from = 0usize;
    let mut delta: isize = 0;
    let mut ends_without_newline = !had_newline;

    for (index, hunk) in file.hunks.iter().enumerate() {
      let old = hunk.old_lines();
      let declared = hunk.old_start.saturating_sub(1);
      let expected = (declared as isize + delta).max(0) as usize;

      let position = find_hunk(&lines, &old, expected, search_from)
        .ok_or_else(|| conflict(index + 1, hunk.old_start, "context does not match"))?;
      if position != expected {
        debug!(file = %target, hunk = index + 1, offset = position as isize - expected as isize, "hunk applied at offset");
      }

      let new = hunk.new_lines();
      let new_len = new.len();
      lines.splice(position..position + old.len(), new);
      search_from = position + new_len;
      delta += new_len as isize - old.len() as isize;
      if hunk.new_no_newline {
        ends_without_newline = true;
      } else if position + new_len == lines.len() && hunk.lines.iter().any(|l| matches!(l, Line::Add(_))) {
        ends_without_newline = false;
      }
    }

    let write_path = match &file.new_path {
      Some(new) => root.join(new),
      None => {
        if !lines.is_empty() {
          return Err(conflict(file.hunks.len().max(1), 1, "file to be deleted is not empty after patching"));
        }
        staged.insert(read_path, None);
        continue;
      }
    };

    let mut content = lines.join(eol);
    if !lines.is_empty() && !ends_without_newline {
      content.push_str(eol);
    }
    if write_path != read_path && file.old_path.is_some() {
      staged.insert(read_path, None);
    }
    staged.insert(write_path, Some(content));
  }

  for (path, content) in staged {
    let io = |source| PatchError::Io {
      path: path.clone(),
      source,
    };
    match content {
      Some(content) => {
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(&path, content).map_err(io)?;
      }
      None => std::fs::remove_file(&path).map_err(io)?,
    }
  }

  debug!(patch = %patch_path.display(), files = files.len(), "patch applied");
  Ok(())
}

/// Terminator of the first line; `lines()` strips either form, so this is
/// what gets written back.
fn line_ending(text: &str) -> &'static str {
  match text.find('\n') {
    Some(i) if text[..i].ends_with('\r') => "\r\n",
    _ => "\n",
  }
}

/// Search outward from `expected` for an exact match, never before
/// `min_start`.
fn find_hunk(lines: &[String], old: &[&str], expected: usize, min_start: usize) -> Option<usize> {
  if old.len() > lines.len() {
    return None;
  }
  let max_start = lines.len() - old.len();
  let matches_at = |pos: usize| pos >= min_start && pos <= max_start && lines[pos..pos + old.len()].iter().zip(old).all(|(a, b)| a == b);

  let limit = lines.len().max(expected) + 1;
  for distance in 0..=limit {
    if let Some(pos) = expected.checked_sub(distance)
      && matches_at(pos)
    {
      return Some(pos);
    }
    if distance > 0 && matches_at(expected + distance) {
      return Some(expected + distance);
    }
  }
  None
}

fn strip_path(raw: &str, strip: usize) -> Option<String> {
  // drop a trailing timestamp separated by a tab
  let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
  if raw == "/dev/null" {
    return None;
  }
  let stripped: PathBuf = Path::new(raw).components().skip(strip).collect();
  Some(stripped.to_string_lossy().replace('\\', "/"))
}

fn parse(patch: &Path, text: &str, strip: usize) -> Result<Vec<FilePatch>, PatchError> {
  let err = |line: usize, message: &str| PatchError::Parse {
    patch: patch.to_path_buf(),
    line,
    message: message.to_string(),
  };

  let lines: Vec<&str> = text.lines().collect();
  let mut files = Vec::new();
  let mut i = 0;

  while i < lines.len() {
    let Some(old_raw) = lines[i].strip_prefix("--- ") else {
      i += 1;
      continue;
    };
    let new_raw = lines
      .get(i + 1)
      .and_then(|l| l.strip_prefix("+++ "))
      .ok_or_else(|| err(i + 2, "expected '+++' after '---'"))?;

    let old_path = strip_path(old_raw, strip);
    let new_path = strip_path(new_raw, strip);
    for path in old_path.iter().chain(new_path.iter()) {
      let escapes = path.is_empty()
        || !Path::new(path).components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
      if escapes {
        return Err(err(i + 1, &format!("path '{path}' is empty or escapes the source tree (check the strip level)")));
      }
    }
    i += 2;

    let mut hunks = Vec::new();
    while let Some(header) = lines.get(i).filter(|l| l.starts_with("@@ ")) {
      let (old_start, old_len, new_len) = parse_hunk_header(header).ok_or_else(|| err(i + 1, "malformed hunk header"))?;
      i += 1;

      let mut hunk = Hunk {
        old_start: if old_len == 0 { old_start + 1 } else { old_start },
        lines: Vec::new(),
        new_no_newline: false,
      };
      let (mut old_seen, mut new_seen) = (0usize, 0usize);
      while old_seen < old_len || new_seen < new_len {
        let line = *lines.get(i).ok_or_else(|| err(i + 1, "hunk ends early"))?;
        match line.chars().next() {
          Some(' ') | None => {
            hunk.lines.push(Line::Context(line.get(1..).unwrap_or("").to_string()));
            old_seen += 1;
            new_seen += 1;
          }
          Some('-') => {
            hunk.lines.push(Line::Remove(line[1..].to_string()));
            old_seen += 1;
          }
          Some('+') => {
            hunk.lines.push(Line::Add(line[1..].to_string()));
            new_seen += 1;
          }
          Some('\\') => {}
          _ => return Err(err(i + 1, "unexpected line inside hunk")),
        }
        i += 1;
      }
      if old_seen != old_len || new_seen != new_len {
        return Err(err(i, "hunk line counts do not match its header"));
      }
      while lines.get(i).is_some_and(|l| l.starts_with('\\')) {
        if matches!(hunk.lines.last(), Some(Line::Add(_)) | Some(Line::Context(_))) {
          hunk.new_no_newline = true;
        }
        i += 1;
      }
      hunks.push(hunk);
    }

    if hunks.is_empty() {
      return Err(err(i + 1, "file section has no hunks"));
    }
    files.push(FilePatch {
      old_path,
      new_path,
      hunks,
    });
  }

  if files.is_empty() {
    return Err(err(1, "no file sections found"));
  }
  Ok(files)
}

/// Parse `@@ -a[,b] +c[,d] @@`, returning `(a, b, d)`.
fn parse_hunk_header(header: &str) -> Option<(usize, usize, usize)> {
  let body = header.strip_prefix("@@ ")?;
  let end = body.find(" @@")?;
  let mut parts = body[..end].split_whitespace();
  let old = parts.next()?.strip_prefix('-')?;
  let new = parts.next()?.strip_prefix('+')?;

  let range = |s: &str| -> Option<(usize, usize)> {
    match s.split_once(',') {
      Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
      None => Some((s.parse().ok()?, 1)),
    }
  };
  let (old_start, old_len) = range(old)?;
  let (_, new_len) = range(new)?;
  Some((old_start, old_len, new_len))
}
