//! Realization of a manifest.
//!
//! Builds are ordered by their dependencies and realized wave by wave. Builds
//! inside a wave run concurrently, bounded by [`ExecuteConfig::parallelism`].
//! A failure never stops unrelated builds; only its dependents are skipped.

pub mod actions;
pub mod dag;
pub mod env;
pub mod resolver;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::build::execute::realize_build;
use crate::manifest::Manifest;
use crate::util::hash::ObjectHash;

pub use dag::ExecutionDag;
pub use types::{BuildResult, DagResult, ExecuteConfig, ExecuteError};

type TaskOutcome = (ObjectHash, Result<BuildResult, ExecuteError>);

/// Realize every build in `manifest`.
///
/// Only structural problems (missing dependency, cycle) are returned as
/// `Err`; build failures are reported in the [`DagResult`].
pub async fn execute_builds(manifest: &Manifest, config: &ExecuteConfig) -> Result<DagResult, ExecuteError> {
  info!(builds = manifest.builds.len(), "starting realization");

  let dag = ExecutionDag::from_manifest(manifest)?;
  let waves = dag.waves()?;
  debug!(waves = waves.len(), "computed waves");

  let mut result = DagResult::default();
  let mut failed: HashSet<ObjectHash> = HashSet::new();
  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));

  for (idx, wave) in waves.iter().enumerate() {
    let mut ready = Vec::new();
    for hash in wave {
      match dag.dependencies(hash).into_iter().find(|d| failed.contains(d)) {
        Some(dep) => {
          warn!(build = %hash, failed_dep = %dep, "skipping build, dependency failed");
          failed.insert(hash.clone());
          result.skipped.insert(hash.clone(), dep);
        }
        None => ready.push(hash.clone()),
      }
    }
    if ready.is_empty() {
      continue;
    }

    debug!(wave = idx, builds = ready.len(), "realizing wave");
    for (hash, outcome) in execute_wave(&ready, manifest, config, &result.realized, semaphore.clone()).await {
      match outcome {
        Ok(build) => {
          info!(build = %hash, cached = build.cached, "build succeeded");
          result.realized.insert(hash, build);
        }
        Err(e) => {
          error!(build = %hash, error = %e, "build failed");
          failed.insert(hash.clone());
          result.failed.push((hash, e));
        }
      }
    }
  }

  info!(
    realized = result.realized.len(),
    failed = result.failed.len(),
    skipped = result.skipped.len(),
    "realization complete"
  );
  Ok(result)
}

/// Realize `roots` and everything they depend on.
pub async fn realize(
  manifest: &Manifest,
  roots: &[ObjectHash],
  config: &ExecuteConfig,
) -> Result<DagResult, ExecuteError> {
  for root in roots {
    if manifest.get(root).is_none() {
      return Err(ExecuteError::BuildNotFound(root.clone()));
    }
  }
  execute_builds(&manifest.subset(roots), config).await
}

async fn execute_wave(
  builds: &[ObjectHash],
  manifest: &Manifest,
  config: &ExecuteConfig,
  completed: &HashMap<ObjectHash, BuildResult>,
  semaphore: Arc<Semaphore>,
) -> Vec<TaskOutcome> {
  let completed = Arc::new(completed.clone());
  let mut join_set = JoinSet::new();

  for hash in builds {
    let Some(def) = manifest.get(hash).cloned() else {
      continue;
    };
    let hash = hash.clone();
    let config = config.clone();
    let completed = completed.clone();
    let semaphore = semaphore.clone();

    join_set.spawn(async move {
      let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => return (hash, Err(ExecuteError::Io(std::io::Error::other(e)))),
      };
      let outcome = realize_build(&hash, &def, &completed, &config).await;
      (hash, outcome)
    });
  }

  let mut results = Vec::new();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok(outcome) => results.push(outcome),
      Err(e) => error!(error = %e, "build task panicked"),
    }
  }
  results
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::BuildDef;
  use crate::pkgs::IndexChain;
  use crate::util::testutil::cmd_build;
  use tempfile::TempDir;

  fn config(temp: &TempDir) -> ExecuteConfig {
    ExecuteConfig::new(temp.path().join("store"), Arc::new(IndexChain::new())).with_parallelism(4)
  }

  fn with_deps(mut def: BuildDef, deps: &[&ObjectHash]) -> BuildDef {
    def.deps = deps.iter().map(|h| (*h).clone()).collect();
    def
  }

  #[tokio::test]
  async fn empty_manifest() {
    let temp = TempDir::new().unwrap();
    let result = execute_builds(&Manifest::default(), &config(&temp)).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.total(), 0);
  }

  #[tokio::test]
  async fn independent_builds_all_realize() {
    let temp = TempDir::new().unwrap();
    let mut manifest = Manifest::default();
    for name in ["a", "b", "c"] {
      manifest.register(cmd_build(name, &format!("echo {name}"))).unwrap();
    }

    let result = execute_builds(&manifest, &config(&temp)).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.realized.len(), 3);
  }

  // Builds run with no tools on PATH, so only shell builtins are available.
  #[cfg(unix)]
  #[tokio::test]
  async fn dependent_sees_dependency_output() {
    let temp = TempDir::new().unwrap();
    let mut manifest = Manifest::default();
    let deps = manifest
      .register(cmd_build("deps", "echo compiled > \"$out/lib\""))
      .unwrap();
    let mut pkg = with_deps(
      cmd_build(
        "pkg",
        &format!("read -r line < \"$${{build:{}:out}}/lib\" && echo \"$line\" > \"$out/seen\"", deps),
      ),
      &[&deps],
    );
    pkg.outputs.insert("bin".to_string(), "$${out}/bin".to_string());
    let pkg = manifest.register(pkg).unwrap();

    let result = execute_builds(&manifest, &config(&temp)).await.unwrap();
    assert!(result.is_success(), "failed: {:?}", result.failed);
    let seen = std::fs::read_to_string(result.realized[&pkg].store_path.join("seen")).unwrap();
    assert_eq!(seen.trim(), "compiled");
  }

  #[tokio::test]
  async fn failure_skips_dependents_only() {
    let temp = TempDir::new().unwrap();
    let mut manifest = Manifest::default();
    let deps = manifest.register(cmd_build("deps", "exit 1")).unwrap();
    let pkg = manifest.register(with_deps(cmd_build("pkg", "echo pkg"), &[&deps])).unwrap();
    let check = manifest.register(with_deps(cmd_build("check", "echo check"), &[&pkg])).unwrap();
    let unrelated = manifest.register(cmd_build("shell-env", "echo env")).unwrap();

    let result = execute_builds(&manifest, &config(&temp)).await.unwrap();

    assert!(!result.is_success());
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].0, deps);
    assert_eq!(result.skipped[&pkg], deps);
    assert_eq!(result.skipped[&check], pkg);
    assert!(result.realized.contains_key(&unrelated));
  }

  #[tokio::test]
  async fn realize_limits_to_closure() {
    let temp = TempDir::new().unwrap();
    let mut manifest = Manifest::default();
    let deps = manifest.register(cmd_build("deps", "echo deps")).unwrap();
    let pkg = manifest.register(with_deps(cmd_build("pkg", "echo pkg"), &[&deps])).unwrap();
    let other = manifest.register(cmd_build("other", "echo other")).unwrap();

    let result = realize(&manifest, std::slice::from_ref(&pkg), &config(&temp)).await.unwrap();
    assert!(result.realized.contains_key(&deps));
    assert!(result.realized.contains_key(&pkg));
    assert!(!result.realized.contains_key(&other));
  }

  #[tokio::test]
  async fn realize_unknown_root() {
    let temp = TempDir::new().unwrap();
    let ghost = ObjectHash("ffffffffffffffffffff".to_string());
    let err = realize(&Manifest::default(), &[ghost], &config(&temp)).await.unwrap_err();
    assert!(matches!(err, ExecuteError::BuildNotFound(_)));
  }
}
