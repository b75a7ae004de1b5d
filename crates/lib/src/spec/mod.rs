//! Build spec types, TOML loading and validation.
//!
//! A spec file describes one pinned native build: where the source comes
//! from and its tree hash, the patches applied to it, the options and
//! dependencies that shape configuration, the native build system, the
//! install check and the development shell.

mod load;
mod types;

use std::path::PathBuf;

use thiserror::Error;

pub use load::{load_spec, parse_spec, validate};
pub use types::*;

#[derive(Debug, Error)]
pub enum SpecError {
  #[error("failed to read spec {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse spec{}: {message}", describe_path(.path))]
  Parse { path: Option<PathBuf>, message: String },

  #[error("invalid spec field '{field}': {message}")]
  Invalid { field: String, message: String },

  #[error("unknown variant '{name}' (available: {available})")]
  UnknownVariant { name: String, available: String },
}

fn describe_path(path: &Option<PathBuf>) -> String {
  path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default()
}

impl BuildSpec {
  /// Merge the named variant over this spec.
  ///
  /// The variant's patch list replaces the base list when present; its
  /// dependencies and flags are appended; its option values replace the
  /// base defaults.
  pub fn with_variant(&self, name: &str) -> Result<BuildSpec, SpecError> {
    let variant = self.variants.get(name).ok_or_else(|| SpecError::UnknownVariant {
      name: name.to_string(),
      available: if self.variants.is_empty() {
        "none".to_string()
      } else {
        self.variants.keys().cloned().collect::<Vec<_>>().join(", ")
      },
    })?;

    let mut merged = self.clone();
    if let Some(patches) = &variant.patches {
      merged.patches = patches.clone();
    }
    merged.dependencies.extend(variant.dependencies.iter().cloned());
    merged.build.flags.extend(variant.flags.iter().cloned());
    for (option, value) in &variant.options {
      if let Some(spec) = merged.options.get_mut(option) {
        spec.default = value.clone();
      }
    }

    validate(&merged)?;
    Ok(merged)
  }
}
