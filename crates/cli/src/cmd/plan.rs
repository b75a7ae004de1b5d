//! Implementation of the `pinbuild plan` command.

use anyhow::{Context, Result};

use pinbuild_lib::pipeline::Pipeline;
use pinbuild_lib::process::TokioRunner;

use super::{SpecArgs, context};
use crate::output::{Status, field, print_json, link, section, status};

pub fn cmd_plan(args: SpecArgs, json: bool) -> Result<()> {
  let request = args.request()?;
  let (host, store, rt) = context()?;
  let runner = TokioRunner::new();
  let pipeline = Pipeline::new(&runner, &host, &store);

  let summary = rt
    .block_on(pipeline.plan(&request))
    .with_context(|| format!("Planning {} failed", request.spec.name))?;

  if json {
    return print_json(&summary);
  }

  let plan = &summary.plan;
  let title = match &plan.variant {
    Some(variant) => format!("{} {} ({variant})", plan.name, plan.version),
    None => format!("{} {}", plan.name, plan.version),
  };
  status(Status::Note, title);
  field("Platform", &plan.platform);
  field("Plan hash", &summary.plan_hash.0);
  field("Store path", summary.store_path.display());
  field("Built", if summary.built { "yes" } else { "no" });

  if !plan.options.is_empty() {
    section("Options");
    for (name, value) in &plan.options {
      println!("  {name} = {value}");
    }
  }
  if !plan.flags.is_empty() {
    section("Flags");
    for flag in &plan.flags {
      println!("  {flag}");
    }
  }
  if !plan.dependencies.entries.is_empty() {
    section("Dependencies");
    for dep in &plan.dependencies.entries {
      let version = dep.version.as_ref().map(|v| format!(" {v}")).unwrap_or_default();
      link(0, format_args!("{}{version}", dep.name), dep.path.display());
    }
  }
  if !plan.patches.is_empty() {
    section("Patches");
    for patch in &plan.patches {
      println!("  {} (-p{})", patch.path, patch.strip);
    }
  }

  Ok(())
}
