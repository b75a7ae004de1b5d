//! Implementation of the `pinbuild build` command.
//!
//! Runs the whole pipeline for one spec and promotes the verified artifact
//! into the store.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use pinbuild_lib::build::Promotion;
use pinbuild_lib::pipeline::Pipeline;
use pinbuild_lib::process::TokioRunner;

use super::{SpecArgs, context};
use crate::output::{Status, elapsed, field, print_json, short_hash, status};

pub fn cmd_build(args: SpecArgs, jobs: Option<usize>, timeout: Option<Duration>, json: bool) -> Result<()> {
  let mut request = args.request()?;
  if let Some(jobs) = jobs {
    request = request.with_jobs(jobs);
  }

  let (host, store, rt) = context()?;
  let runner = TokioRunner::new().with_timeout(timeout);
  let mut pipeline = Pipeline::new(&runner, &host, &store);

  let start = Instant::now();
  let outcome = rt
    .block_on(pipeline.build(&request))
    .with_context(|| format!("Build of {} failed", request.spec.name))?;

  if json {
    return print_json(&outcome);
  }

  let artifact = &outcome.artifact;
  status(Status::Done, format_args!("Built {} {}", artifact.name, artifact.version));
  field("Path", artifact.path.display());
  field("Plan", short_hash(&artifact.plan_hash.0));
  field("Content", short_hash(&artifact.content_hash.0));
  field("Source trees", outcome.source.tree_count());
  for (name, path) in artifact.outputs.iter().filter(|(name, _)| name.as_str() != "out") {
    field(&format!("Output {name}"), path.display());
  }
  match &outcome.promotion {
    Promotion::Installed => {}
    Promotion::Unchanged => field("Store", "identical artifact already present"),
    Promotion::Kept { discarded } => status(
      Status::Warn,
      format_args!(
        "Build is not reproducible: kept the stored artifact, discarded output {}",
        short_hash(&discarded.0)
      ),
    ),
    Promotion::Repaired { previous } => status(
      Status::Warn,
      format_args!(
        "Replaced a damaged store entry (was {})",
        previous.as_ref().map(|h| short_hash(&h.0)).unwrap_or("unmarked")
      ),
    ),
  }
  field("Took", elapsed(start.elapsed()));

  Ok(())
}
