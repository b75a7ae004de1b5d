//! Downloading source archives into the cache.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::FetchError;
use crate::util::hash::hash_bytes;

/// Download `url` into `cache_dir`, reusing an earlier download of the same
/// URL.
///
/// The cache is keyed by URL only. Content is verified by the caller after
/// unpacking; a cached archive that fails verification should be removed
/// with [`evict`].
pub async fn download(url: &str, cache_dir: &Path) -> Result<PathBuf, FetchError> {
  fs::create_dir_all(cache_dir).await.map_err(|source| FetchError::Io {
    path: cache_dir.to_path_buf(),
    source,
  })?;

  let dest = cache_dir.join(cache_filename(url));
  if dest.is_file() {
    info!(url = %url, path = %dest.display(), "using cached download");
    return Ok(dest);
  }

  info!(url = %url, "downloading");
  let failed = |message: String| FetchError::Download {
    url: url.to_string(),
    message,
  };

  let mut response = reqwest::get(url).await.map_err(|e| failed(e.to_string()))?;
  if !response.status().is_success() {
    return Err(failed(format!("HTTP {}", response.status())));
  }

  // Write to a sibling file first so an interrupted download is never
  // mistaken for a cache hit.
  let partial = dest.with_extension("part");
  let io_err = |source| FetchError::Io {
    path: partial.clone(),
    source,
  };
  let mut file = fs::File::create(&partial).await.map_err(io_err)?;
  let mut size = 0usize;
  while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
    size += chunk.len();
    file.write_all(&chunk).await.map_err(io_err)?;
  }
  file.flush().await.map_err(io_err)?;
  drop(file);

  fs::rename(&partial, &dest).await.map_err(|source| FetchError::Io {
    path: dest.clone(),
    source,
  })?;

  info!(path = %dest.display(), size, "download complete");
  Ok(dest)
}

/// Drop a cached download.
pub async fn evict(path: &Path) {
  if let Err(err) = fs::remove_file(path).await {
    debug!(path = %path.display(), error = %err, "failed to evict cached download");
  }
}

/// Cache file name: a short hash of the full URL followed by its sanitized
/// last path component, so equal file names from different URLs
/// (`v1.0.tar.gz`) never collide.
pub fn cache_filename(url: &str) -> String {
  let key = &hash_bytes(url.as_bytes()).0[..16];
  format!("{key}-{}", url_to_filename(url))
}

fn url_to_filename(url: &str) -> String {
  let last = url.split(['?', '#']).next().unwrap_or(url).rsplit('/').next().unwrap_or("");
  let sanitized: String = last
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect();

  if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
    "download".to_string()
  } else {
    sanitized
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn filename_strips_query_and_sanitizes() {
    assert_eq!(url_to_filename("https://example.com/file.tar.gz?token=abc"), "file.tar.gz");
    assert_eq!(url_to_filename("https://example.com/file name.tar.gz"), "file_name.tar.gz");
    assert_eq!(url_to_filename("https://example.com/"), "download");
  }

  #[test]
  fn same_file_name_from_different_urls_does_not_collide() {
    let a = cache_filename("https://github.com/google/shaderc/archive/v1.0.tar.gz");
    let b = cache_filename("https://github.com/KhronosGroup/glslang/archive/v1.0.tar.gz");
    assert_ne!(a, b);
    assert!(a.ends_with("-v1.0.tar.gz"));
  }

  #[tokio::test]
  async fn cached_file_is_reused_without_network() {
    let temp = tempfile::tempdir().unwrap();
    let url = "https://invalid.example/never-fetched.tar.gz";
    let cached = temp.path().join(cache_filename(url));
    std::fs::write(&cached, b"cached").unwrap();

    let path = download(url, temp.path()).await.unwrap();
    assert_eq!(path, cached);

    evict(&path).await;
    assert!(!cached.exists());
  }
}
