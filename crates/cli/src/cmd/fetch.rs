use anyhow::{Context, Result};

use pinbuild_lib::fetch::FetchedSource;
use pinbuild_lib::pipeline::Pipeline;
use pinbuild_lib::process::TokioRunner;

use super::{SpecArgs, context};
use crate::output::{Status, field, print_json, link, status};

pub fn cmd_fetch(args: SpecArgs, json: bool) -> Result<()> {
  let request = args.request()?;
  let (host, store, rt) = context()?;
  let runner = TokioRunner::new();
  let mut pipeline = Pipeline::new(&runner, &host, &store);

  let fetched = rt
    .block_on(pipeline.fetch(&request))
    .with_context(|| format!("Fetch of {} failed", request.spec.name))?;

  if json {
    return print_json(&fetched);
  }

  status(Status::Done, format_args!("Verified {} source tree(s)", fetched.tree_count()));
  field("Location", &fetched.location);
  field("sha256", &fetched.hash.0);
  print_sub_sources(&fetched, 0);
  Ok(())
}

fn print_sub_sources(source: &FetchedSource, depth: usize) {
  for sub in &source.sub_sources {
    link(depth, &sub.location, &sub.hash.0);
    print_sub_sources(sub, depth + 1);
  }
}
