//! Implementation of the `pinbuild info` command.

use anyhow::{Context, Result};
use serde::Serialize;

use pinbuild_lib::build::{BuildArtifact, BuildStore};
use pinbuild_lib::pipeline::{PipelineError, default_jobs};
use pinbuild_lib::platform::{HostFacts, paths};

use crate::output::{field, print_json, section, short_hash};

#[derive(Serialize)]
struct InfoOutput {
  platform: String,
  jobs: usize,
  store: String,
  downloads: String,
  search_path: Vec<String>,
  prefixes: Vec<String>,
  artifacts: Vec<BuildArtifact>,
}

pub fn cmd_info(json: bool) -> Result<()> {
  let host = HostFacts::detect().map_err(PipelineError::from)?;
  let store = BuildStore::from_env();
  let artifacts = store.artifacts().context("Failed to list store artifacts")?;

  let info = InfoOutput {
    platform: host.platform.to_string(),
    jobs: default_jobs(),
    store: store.root().display().to_string(),
    downloads: paths::downloads_dir().display().to_string(),
    search_path: host.search_path.iter().map(|p| p.display().to_string()).collect(),
    prefixes: host.prefixes.iter().map(|p| p.display().to_string()).collect(),
    artifacts,
  };

  if json {
    return print_json(&info);
  }

  println!("pinbuild host");
  field("Platform", &info.platform);
  field("Default jobs", info.jobs);
  field("Store", &info.store);
  field("Downloads", &info.downloads);
  field("Prefixes", info.prefixes.join(", "));
  field("Search path", format_args!("{} entries", info.search_path.len()));

  if info.artifacts.is_empty() {
    println!();
    println!("No artifacts in store.");
  } else {
    section("Artifacts");
    for artifact in &info.artifacts {
      println!(
        "  {} {} [{}] {}",
        artifact.name,
        artifact.version,
        short_hash(&artifact.plan_hash.0),
        artifact.path.display()
      );
    }
  }

  Ok(())
}
