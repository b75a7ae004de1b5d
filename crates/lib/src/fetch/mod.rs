//! Retrieving pinned sources.
//!
//! A source is materialized into a directory, hashed with
//! [`hash_directory`] and compared against its pinned hash before anything
//! else happens to it. Sub-sources are fetched afterwards into their `dest`
//! inside the parent, each verified against its own pin, so the parent's
//! hash never covers them.

pub mod archive;
pub mod download;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::spec::{SourceLocation, SourceSpec};
use crate::util::hash::{ContentHash, DirHashError, hash_directory};
use archive::ArchiveKind;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("integrity check failed for {location}: expected {expected}, got {actual}")]
  Integrity {
    location: String,
    expected: String,
    actual: String,
  },

  #[error("invalid pinned hash '{0}'")]
  InvalidHash(String),

  #[error("failed to download {url}: {message}")]
  Download { url: String, message: String },

  #[error("unsupported archive format: {0} (expected .tar.gz, .tgz or .tar)")]
  UnsupportedArchive(String),

  #[error("failed to unpack {path}: {source}")]
  Unpack {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("local source {0} does not exist")]
  MissingPath(PathBuf),

  #[error("sub-source destination {0} already has content")]
  SubSourceConflict(String),

  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Hash(#[from] DirHashError),
}

/// Where relative paths resolve and downloads are cached.
#[derive(Debug, Clone)]
pub struct FetchContext {
  /// Directory of the spec file; `path` sources and patches are relative to it.
  pub spec_dir: PathBuf,
  pub download_dir: PathBuf,
}

/// A verified source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedSource {
  pub location: String,
  pub root: PathBuf,
  pub hash: ContentHash,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub sub_sources: Vec<FetchedSource>,
}

impl FetchedSource {
  /// Number of verified trees, this one included.
  pub fn tree_count(&self) -> usize {
    1 + self.sub_sources.iter().map(FetchedSource::tree_count).sum::<usize>()
  }
}

/// Fetch `source` into `dest`, verify it, then recursively fetch and verify
/// its sub-sources.
///
/// Fails with [`FetchError::Integrity`] on the first tree whose hash does not
/// match its pin.
pub async fn fetch_source(source: &SourceSpec, ctx: &FetchContext, dest: &Path) -> Result<FetchedSource, FetchError> {
  let location = source
    .location()
    .ok_or_else(|| FetchError::InvalidHash(format!("{} (no unique location)", source.sha256)))?;
  let expected = ContentHash::parse(&source.sha256).ok_or_else(|| FetchError::InvalidHash(source.sha256.clone()))?;
  let label = location.to_string();

  info!(source = %label, dest = %dest.display(), "fetching source");
  let cached = materialize(&location, ctx, dest).await?;

  let actual = hash_directory(dest, &[])?;
  if actual != expected {
    if let Some(path) = cached {
      download::evict(&path).await;
    }
    warn!(source = %label, expected = %expected, actual = %actual, "source hash mismatch");
    return Err(FetchError::Integrity {
      location: label,
      expected: expected.0,
      actual: actual.0,
    });
  }

  let mut sub_sources = Vec::with_capacity(source.sub_sources.len());
  for sub in &source.sub_sources {
    let sub_dest = dest.join(&sub.dest);
    prepare_sub_dest(&sub_dest, &sub.dest)?;
    let fetched = Box::pin(fetch_source(&sub.source, ctx, &sub_dest)).await?;
    sub_sources.push(fetched);
  }

  info!(source = %label, hash = %actual, "source verified");
  Ok(FetchedSource {
    location: label,
    root: dest.to_path_buf(),
    hash: actual,
    sub_sources,
  })
}

/// Place the source tree at `dest`. Returns the cached download, if any.
async fn materialize(location: &SourceLocation<'_>, ctx: &FetchContext, dest: &Path) -> Result<Option<PathBuf>, FetchError> {
  match location {
    SourceLocation::Github(gh) => {
      let url = gh.archive_url();
      let archive = download::download(&url, &ctx.download_dir).await?;
      unpack_blocking(archive.clone(), ArchiveKind::TarGz, dest.to_path_buf()).await?;
      Ok(Some(archive))
    }
    SourceLocation::Url(url) => {
      let kind = ArchiveKind::detect(url).ok_or_else(|| FetchError::UnsupportedArchive(url.to_string()))?;
      let archive = download::download(url, &ctx.download_dir).await?;
      unpack_blocking(archive.clone(), kind, dest.to_path_buf()).await?;
      Ok(Some(archive))
    }
    SourceLocation::Path(rel) => {
      let path = ctx.spec_dir.join(rel);
      if path.is_dir() {
        let (src, out) = (path.clone(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || archive::copy_tree(&src, &out))
          .await
          .map_err(|e| FetchError::Io {
            path: path.clone(),
            source: std::io::Error::other(e),
          })?
          .map_err(|source| FetchError::Io { path, source })?;
        Ok(None)
      } else if path.is_file() {
        let name = path.to_string_lossy().to_string();
        let kind = ArchiveKind::detect(&name).ok_or(FetchError::UnsupportedArchive(name))?;
        unpack_blocking(path, kind, dest.to_path_buf()).await?;
        Ok(None)
      } else {
        Err(FetchError::MissingPath(path))
      }
    }
  }
}

async fn unpack_blocking(archive: PathBuf, kind: ArchiveKind, dest: PathBuf) -> Result<(), FetchError> {
  let path = archive.clone();
  tokio::task::spawn_blocking(move || archive::unpack(&archive, kind, &dest))
    .await
    .map_err(|e| FetchError::Unpack {
      path: path.clone(),
      source: std::io::Error::other(e),
    })?
    .map_err(|source| FetchError::Unpack { path, source })
}

/// Archives commonly ship empty directories where submodules belong; those
/// are replaced, anything else is a conflict.
fn prepare_sub_dest(path: &Path, rel: &str) -> Result<(), FetchError> {
  let io = |source| FetchError::Io {
    path: path.to_path_buf(),
    source,
  };
  if path.is_dir() {
    let empty = std::fs::read_dir(path).map_err(io)?.next().is_none();
    if !empty {
      return Err(FetchError::SubSourceConflict(rel.to_string()));
    }
    std::fs::remove_dir(path).map_err(io)?;
  } else if path.exists() {
    return Err(FetchError::SubSourceConflict(rel.to_string()));
  }
  Ok(())
}
