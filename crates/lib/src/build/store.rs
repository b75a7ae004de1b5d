//! Build artifact storage.
//!
//! Artifacts live at `<store>/build/<plan hash>/`. A directory only counts as
//! an artifact once it carries a completion marker whose recorded content
//! hash matches the tree. Per-invocation workspaces live under
//! `<store>/tmp/` so promotion is a rename on one file system.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info, warn};

use super::BuildError;
use crate::platform::paths::store_dir;
use crate::spec::BuildSpec;
use crate::util::hash::{ContentHash, ObjectHash, hash_directory};

/// Marker file name indicating a build was promoted successfully.
pub const BUILD_COMPLETE_MARKER: &str = ".pinbuild-complete";

/// Files excluded when hashing artifact contents.
const BUILD_HASH_EXCLUSIONS: &[&str] = &[BUILD_COMPLETE_MARKER];

const MARKER_VERSION: u32 = 1;

/// Marker file content structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMarker {
  /// Marker format version.
  pub version: u32,
  /// Always "complete".
  pub status: String,
  pub plan_hash: ObjectHash,
  /// Hash of the artifact tree, marker excluded.
  pub output_hash: ContentHash,
  pub name: String,
  pub spec_version: String,
  /// Named outputs relative to the artifact root.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub outputs: BTreeMap<String, String>,
}

/// A verified artifact in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifact {
  pub name: String,
  pub version: String,
  pub path: PathBuf,
  pub plan_hash: ObjectHash,
  pub content_hash: ContentHash,
  /// Named outputs; `out` is always the artifact root.
  pub outputs: BTreeMap<String, PathBuf>,
}

impl BuildArtifact {
  fn from_marker(path: PathBuf, marker: BuildMarker) -> Self {
    let mut outputs: BTreeMap<String, PathBuf> = marker
      .outputs
      .iter()
      .map(|(name, rel)| (name.clone(), path.join(rel)))
      .collect();
    outputs.insert("out".to_string(), path.clone());
    Self {
      name: marker.name,
      version: marker.spec_version,
      path,
      plan_hash: marker.plan_hash,
      content_hash: marker.output_hash,
      outputs,
    }
  }
}

/// What promotion did to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Promotion {
  /// The artifact did not exist before.
  Installed,
  /// An identical artifact already existed; the new tree was discarded.
  Unchanged,
  /// An intact artifact with different content already existed and was
  /// kept; the new tree, hashing to `discarded`, was thrown away.
  Kept { discarded: ContentHash },
  /// A damaged directory occupied the store path and was replaced.
  Repaired { previous: Option<ContentHash> },
}

/// The artifact store rooted at one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStore {
  root: PathBuf,
}

impl BuildStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// The store named by `PINBUILD_STORE`, or the platform default.
  pub fn from_env() -> Self {
    Self::new(store_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn build_path(&self, hash: &ObjectHash) -> PathBuf {
    self.root.join("build").join(&hash.0)
  }

  pub fn tmp_root(&self) -> PathBuf {
    self.root.join("tmp")
  }

  /// A fresh workspace for one invocation, removed when dropped.
  pub fn workspace(&self) -> Result<TempDir, BuildError> {
    let tmp = self.tmp_root();
    let io = |source| BuildError::Io {
      path: tmp.clone(),
      source,
    };
    std::fs::create_dir_all(&tmp).map_err(io)?;
    tempfile::Builder::new().prefix("build-").tempdir_in(&tmp).map_err(io)
  }

  /// Read the completion marker of the artifact at `path`.
  ///
  /// Returns `None` if the marker doesn't exist.
  pub fn read_marker(path: &Path) -> Result<Option<BuildMarker>, BuildError> {
    let marker_path = path.join(BUILD_COMPLETE_MARKER);
    if !marker_path.exists() {
      return Ok(None);
    }

    let content = std::fs::read_to_string(&marker_path).map_err(|source| BuildError::Io {
      path: marker_path.clone(),
      source,
    })?;
    let marker = serde_json::from_str(&content).map_err(|e| BuildError::Marker {
      path: marker_path,
      message: e.to_string(),
    })?;
    Ok(Some(marker))
  }

  /// The artifact for `hash`, if present and intact.
  ///
  /// A directory without a marker, or whose contents no longer match the
  /// marker's hash, is reported as absent.
  pub fn lookup(&self, hash: &ObjectHash) -> Result<Option<BuildArtifact>, BuildError> {
    let path = self.build_path(hash);
    let Some(marker) = Self::read_marker(&path)? else {
      return Ok(None);
    };

    let actual = hash_directory(&path, BUILD_HASH_EXCLUSIONS)?;
    if actual != marker.output_hash {
      warn!(
        path = %path.display(),
        expected = %marker.output_hash,
        actual = %actual,
        "artifact contents do not match completion marker"
      );
      return Ok(None);
    }

    Ok(Some(BuildArtifact::from_marker(path, marker)))
  }

  /// Every marked artifact, sorted by plan hash. Contents are not verified.
  pub fn artifacts(&self) -> Result<Vec<BuildArtifact>, BuildError> {
    let build_root = self.root.join("build");
    if !build_root.is_dir() {
      return Ok(Vec::new());
    }

    let io = |source| BuildError::Io {
      path: build_root.clone(),
      source,
    };
    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(&build_root).map_err(io)? {
      let path = entry.map_err(io)?.path();
      if let Some(marker) = Self::read_marker(&path)? {
        artifacts.push(BuildArtifact::from_marker(path, marker));
      }
    }
    artifacts.sort_by(|a, b| a.plan_hash.cmp(&b.plan_hash));
    Ok(artifacts)
  }

  /// Move a verified staged tree to its final location.
  ///
  /// The marker is written into `staged` before the rename, so the final
  /// path never exists without one. A promoted artifact is never modified:
  /// if an intact artifact is already present the staged tree is discarded,
  /// whether or not its content matches. Only a damaged directory (no
  /// marker, or contents that no longer match it) is replaced.
  pub async fn promote(
    &self,
    staged: &Path,
    plan_hash: &ObjectHash,
    spec: &BuildSpec,
  ) -> Result<(BuildArtifact, Promotion), BuildError> {
    let io = |path: &Path| {
      let path = path.to_path_buf();
      move |source| BuildError::Io { path, source }
    };

    let output_hash = hash_directory(staged, BUILD_HASH_EXCLUSIONS)?;
    let final_path = self.build_path(plan_hash);

    if final_path.exists()
      && let Some(existing) = self.lookup(plan_hash).ok().flatten()
    {
      fs::remove_dir_all(staged).await.map_err(io(staged))?;
      if existing.content_hash == output_hash {
        debug!(path = %final_path.display(), "identical artifact already present");
        return Ok((existing, Promotion::Unchanged));
      }
      warn!(
        path = %final_path.display(),
        existing = %existing.content_hash,
        discarded = %output_hash,
        "build is not reproducible; keeping the promoted artifact"
      );
      return Ok((existing, Promotion::Kept { discarded: output_hash }));
    }

    let marker = BuildMarker {
      version: MARKER_VERSION,
      status: "complete".to_string(),
      plan_hash: plan_hash.clone(),
      output_hash: output_hash.clone(),
      name: spec.name.clone(),
      spec_version: spec.version.clone(),
      outputs: spec.outputs.clone(),
    };
    let content = serde_json::to_string(&marker).map_err(|e| BuildError::Marker {
      path: staged.join(BUILD_COMPLETE_MARKER),
      message: e.to_string(),
    })?;
    let marker_path = staged.join(BUILD_COMPLETE_MARKER);
    fs::write(&marker_path, format!("{content}\n"))
      .await
      .map_err(io(&marker_path))?;

    let promotion = if final_path.exists() {
      let previous = Self::read_marker(&final_path).ok().flatten().map(|m| m.output_hash);
      warn!(path = %final_path.display(), "replacing damaged artifact");
      let aside = self.tmp_root().join(format!("damaged-{}-{}", plan_hash, std::process::id()));
      swap_into_place(staged, &final_path, &aside).await?;
      Promotion::Repaired { previous }
    } else {
      let parent = self.root.join("build");
      fs::create_dir_all(&parent).await.map_err(io(&parent))?;
      fs::rename(staged, &final_path).await.map_err(io(&final_path))?;
      Promotion::Installed
    };

    info!(path = %final_path.display(), hash = %output_hash, "artifact promoted");
    Ok((BuildArtifact::from_marker(final_path, marker), promotion))
  }
}

/// Replace `final_path` with `staged`, parking the old tree at `aside`.
///
/// If the second rename fails the old tree is moved back, so `final_path`
/// holds either the old or the new tree.
async fn swap_into_place(staged: &Path, final_path: &Path, aside: &Path) -> Result<(), BuildError> {
  let io = |path: &Path| {
    let path = path.to_path_buf();
    move |source| BuildError::Io { path, source }
  };

  fs::rename(final_path, aside).await.map_err(io(final_path))?;
  if let Err(source) = fs::rename(staged, final_path).await {
    if let Err(e) = fs::rename(aside, final_path).await {
      warn!(path = %aside.display(), error = %e, "failed to restore previous tree");
    }
    return Err(BuildError::Io {
      path: final_path.to_path_buf(),
      source,
    });
  }
  if let Err(e) = fs::remove_dir_all(aside).await {
    warn!(path = %aside.display(), error = %e, "failed to remove replaced tree");
  }
  Ok(())
}
