//! The build pipeline.
//!
//! One invocation walks `Pending -> Fetched -> Patched -> Configured ->
//! Built -> Verified -> Done`, or stops in `Failed`. Nothing is retried and
//! nothing is resumed: every invocation starts over in a fresh workspace
//! under the store's `tmp/`, and only a verified tree is promoted.

mod error;
mod state;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::build::{
  BuildArtifact, BuildContext, BuildError, BuildLayout, BuildStore, PhaseReport, Promotion, phase_commands,
  run_phases,
};
use crate::check::install_check;
use crate::configure::{ConfiguredOptions, configure, resolve_options};
use crate::env::{ActivationDescriptor, ComposeError, ResolvedEnvironment, compose_environment};
use crate::fetch::{FetchContext, FetchedSource, fetch_source};
use crate::patch::{PatchError, apply_patches};
use crate::platform::paths::downloads_dir;
use crate::platform::{HostFacts, Platform};
use crate::process::ProcessRunner;
use crate::spec::{BuildSpec, BuildSystemSpec, CheckSpec, OptionValue, SourceSpec, SpecError, load_spec};
use crate::store_lock::{LockMode, StoreLock};
use crate::util::hash::{ContentHash, Hashable, ObjectHash, hash_file};

pub use error::PipelineError;
pub use state::{PipelineState, StateLog};

/// What to build and how.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub spec: BuildSpec,
  /// Relative source paths and patches resolve against this directory.
  pub spec_dir: PathBuf,
  /// Raw `name -> value` option overrides.
  pub options: BTreeMap<String, String>,
  pub variant: Option<String>,
  pub jobs: usize,
}

impl BuildRequest {
  pub fn new(spec: BuildSpec, spec_dir: impl Into<PathBuf>) -> Self {
    Self {
      spec,
      spec_dir: spec_dir.into(),
      options: BTreeMap::new(),
      variant: None,
      jobs: default_jobs(),
    }
  }

  /// Load the spec at `path`; its directory becomes the spec directory.
  pub fn load(path: &Path) -> Result<Self, SpecError> {
    let spec = load_spec(path)?;
    let dir = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
      _ => PathBuf::from("."),
    };
    let dir = dunce::canonicalize(&dir).unwrap_or(dir);
    Ok(Self::new(spec, dir))
  }

  pub fn with_options(mut self, options: BTreeMap<String, String>) -> Self {
    self.options = options;
    self
  }

  pub fn with_variant(mut self, variant: Option<String>) -> Self {
    self.variant = variant;
    self
  }

  pub fn with_jobs(mut self, jobs: usize) -> Self {
    self.jobs = jobs.max(1);
    self
  }

  /// The spec with the requested variant merged in.
  pub fn effective_spec(&self) -> Result<BuildSpec, SpecError> {
    match &self.variant {
      Some(name) => self.spec.with_variant(name),
      None => Ok(self.spec.clone()),
    }
  }
}

pub fn default_jobs() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// A patch as it contributes to the plan hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchDigest {
  pub path: String,
  pub strip: usize,
  pub sha256: ContentHash,
}

/// Every input that determines the artifact, hashed to name its store path.
///
/// Build parallelism is not part of the plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildPlan {
  pub name: String,
  pub version: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub variant: Option<String>,
  pub platform: Platform,
  pub source: SourceSpec,
  pub patches: Vec<PatchDigest>,
  pub options: BTreeMap<String, OptionValue>,
  pub flags: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub build: BuildSystemSpec,
  pub dependencies: ResolvedEnvironment,
  pub outputs: BTreeMap<String, String>,
  pub check: CheckSpec,
}

impl Hashable for BuildPlan {}

impl BuildPlan {
  pub fn new(
    spec: &BuildSpec,
    variant: Option<String>,
    host: &HostFacts,
    options: &ConfiguredOptions,
    environment: &ResolvedEnvironment,
    spec_dir: &Path,
  ) -> Result<Self, PatchError> {
    let patches = spec
      .patches
      .iter()
      .map(|patch| {
        let path = spec_dir.join(patch.path());
        let sha256 = hash_file(&path).map_err(|e| PatchError::Read {
          path: path.clone(),
          source: std::io::Error::other(e.to_string()),
        })?;
        Ok(PatchDigest {
          path: patch.path().to_string(),
          strip: patch.strip(),
          sha256,
        })
      })
      .collect::<Result<Vec<_>, PatchError>>()?;

    Ok(Self {
      name: spec.name.clone(),
      version: spec.version.clone(),
      variant,
      platform: host.platform,
      source: spec.source.clone(),
      patches,
      options: options.values.clone(),
      flags: options.flags.clone(),
      env: options.env.clone(),
      build: spec.build.clone(),
      dependencies: environment.clone(),
      outputs: spec.outputs.clone(),
      check: spec.check.clone(),
    })
  }
}

/// Result of a dry run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
  pub plan_hash: ObjectHash,
  pub store_path: PathBuf,
  /// An intact artifact for this plan is already in the store.
  pub built: bool,
  pub plan: BuildPlan,
}

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
  pub artifact: BuildArtifact,
  pub promotion: Promotion,
  pub source: FetchedSource,
  pub phases: Vec<PhaseReport>,
  pub states: Vec<PipelineState>,
}

/// Runs pipeline operations against one store on one host.
pub struct Pipeline<'a, R> {
  runner: &'a R,
  host: &'a HostFacts,
  store: &'a BuildStore,
  download_dir: PathBuf,
  log: StateLog,
}

impl<'a, R: ProcessRunner> Pipeline<'a, R> {
  pub fn new(runner: &'a R, host: &'a HostFacts, store: &'a BuildStore) -> Self {
    Self {
      runner,
      host,
      store,
      download_dir: downloads_dir(),
      log: StateLog::new(),
    }
  }

  pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.download_dir = dir.into();
    self
  }

  /// States visited by the last `build` or `fetch`.
  pub fn states(&self) -> &[PipelineState] {
    self.log.visited()
  }

  fn fetch_context(&self, request: &BuildRequest) -> FetchContext {
    FetchContext {
      spec_dir: request.spec_dir.clone(),
      download_dir: self.download_dir.clone(),
    }
  }

  /// Fetch and verify the source tree without building.
  pub async fn fetch(&mut self, request: &BuildRequest) -> Result<FetchedSource, PipelineError> {
    self.log = StateLog::new();
    let result = self.run_fetch(request).await;
    if let Err(err) = &result {
      self.log.fail(err.to_string());
    }
    result
  }

  async fn run_fetch(&mut self, request: &BuildRequest) -> Result<FetchedSource, PipelineError> {
    let spec = request.effective_spec()?;
    let _lock = StoreLock::acquire(self.store.root(), LockMode::Shared, "fetch")?;
    let work = self.store.workspace()?;

    let fetched = fetch_source(&spec.source, &self.fetch_context(request), &BuildLayout::source_path(work.path())).await?;
    self.log.advance(PipelineState::Fetched);
    Ok(fetched)
  }

  /// Resolve options and dependencies and compute the plan hash. No source
  /// is fetched and no build process is started.
  pub async fn plan(&self, request: &BuildRequest) -> Result<PlanSummary, PipelineError> {
    let spec = request.effective_spec()?;
    let (options, environment) = configure(&spec, &request.options, self.host, self.runner).await?;
    let plan = BuildPlan::new(
      &spec,
      request.variant.clone(),
      self.host,
      &options,
      &environment,
      &request.spec_dir,
    )?;
    let plan_hash = plan.compute_hash()?;

    Ok(PlanSummary {
      store_path: self.store.build_path(&plan_hash),
      built: self.store.lookup(&plan_hash)?.is_some(),
      plan_hash,
      plan,
    })
  }

  /// Run the full pipeline and promote the verified artifact.
  pub async fn build(&mut self, request: &BuildRequest) -> Result<BuildOutcome, PipelineError> {
    self.log = StateLog::new();
    let result = self.run_build(request).await;
    if let Err(err) = &result {
      self.log.fail(err.to_string());
    }
    result
  }

  async fn run_build(&mut self, request: &BuildRequest) -> Result<BuildOutcome, PipelineError> {
    let spec = request.effective_spec()?;
    // unknown or conflicting options fail before anything is downloaded
    resolve_options(&spec, &request.options, self.host)?;

    let _lock = StoreLock::acquire(self.store.root(), LockMode::Exclusive, "build")?;
    let work = self.store.workspace()?;
    let source_root = BuildLayout::source_path(work.path());

    let source = fetch_source(&spec.source, &self.fetch_context(request), &source_root).await?;
    self.log.advance(PipelineState::Fetched);

    apply_patches(&source_root, &spec.patches, &request.spec_dir)?;
    self.log.advance(PipelineState::Patched);

    let (options, environment) = configure(&spec, &request.options, self.host, self.runner).await?;
    let plan = BuildPlan::new(
      &spec,
      request.variant.clone(),
      self.host,
      &options,
      &environment,
      &request.spec_dir,
    )?;
    let plan_hash = plan.compute_hash()?;
    info!(name = %spec.name, hash = %plan_hash, "build plan resolved");
    self.log.advance(PipelineState::Configured);

    let layout = BuildLayout::new(
      work.path(),
      self.store.build_path(&plan_hash),
      spec.build.source_subdir.as_deref(),
    );
    layout.create_dirs()?;
    let ctx = BuildContext {
      spec: &spec,
      options: &options,
      environment: &environment,
      layout: &layout,
      jobs: request.jobs.max(1),
      os: self.host.platform.os,
    };

    let commands = phase_commands(&ctx).map_err(BuildError::from)?;
    let phases = run_phases(self.runner, &commands).await?;
    self.log.advance(PipelineState::Built);

    install_check(&ctx, self.runner).await?;
    self.log.advance(PipelineState::Verified);

    let (artifact, promotion) = self.store.promote(&layout.staged_prefix(), &plan_hash, &spec).await?;
    self.log.advance(PipelineState::Done);

    Ok(BuildOutcome {
      artifact,
      promotion,
      source,
      phases,
      states: self.log.visited().to_vec(),
    })
  }

  /// Compose the development shell environment for the spec.
  ///
  /// When the shell includes the built artifact, the artifact for the
  /// current plan must already be in the store.
  pub async fn dev_environment(&self, request: &BuildRequest) -> Result<ActivationDescriptor, PipelineError> {
    let spec = request.effective_spec()?;
    let shell = spec.shell.as_ref().ok_or(ComposeError::NoShell)?;
    let _lock = StoreLock::acquire(self.store.root(), LockMode::Shared, "env")?;

    let artifact = if shell.include_artifact {
      let summary = self.plan(request).await?;
      let artifact = self
        .store
        .lookup(&summary.plan_hash)?
        .ok_or_else(|| ComposeError::MissingTool {
          name: spec.name.clone(),
          reason: format!(
            "no completed build at {} (run `pinbuild build` first)",
            summary.store_path.display()
          ),
        })?;
      Some(artifact)
    } else {
      None
    };

    let descriptor = compose_environment(
      Some(shell),
      self.host,
      self.runner,
      artifact.as_ref().map(|a| a.path.as_path()),
    )
    .await?;
    Ok(descriptor)
  }
}
