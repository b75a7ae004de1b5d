mod build;
mod env;
mod fetch;
mod hash;
mod info;
mod plan;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use pinbuild_lib::build::BuildStore;
use pinbuild_lib::pipeline::{BuildRequest, PipelineError};
use pinbuild_lib::platform::HostFacts;

pub use build::cmd_build;
pub use env::cmd_env;
pub use fetch::cmd_fetch;
pub use hash::cmd_hash;
pub use info::cmd_info;
pub use plan::cmd_plan;

/// Which spec to load and how to configure it.
pub struct SpecArgs {
  pub spec: PathBuf,
  pub options: BTreeMap<String, String>,
  pub variant: Option<String>,
}

impl SpecArgs {
  pub fn request(self) -> Result<BuildRequest> {
    let request = BuildRequest::load(&self.spec)
      .map_err(PipelineError::from)
      .with_context(|| format!("Failed to load spec {}", self.spec.display()))?;
    Ok(request.with_options(self.options).with_variant(self.variant))
  }
}

/// Host facts, the store and an async runtime: what every pipeline command needs.
pub fn context() -> Result<(HostFacts, BuildStore, tokio::runtime::Runtime)> {
  let host = HostFacts::detect().map_err(PipelineError::from)?;
  let store = BuildStore::from_env();
  debug!(platform = %host.platform, store = %store.root().display(), "host detected");
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  Ok((host, store, rt))
}
