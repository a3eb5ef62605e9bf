//! Realizing a single build.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::build::BuildDef;
use crate::build::store::{build_path, read_marker, verify, write_marker};
use crate::consts::BUILD_TMP_DIR;
use crate::execute::actions::execute_action;
use crate::execute::env::BuildEnv;
use crate::execute::resolver::BuildResolver;
use crate::execute::types::{BuildResult, ExecuteConfig, ExecuteError};
use crate::placeholder;
use crate::platform::System;
use crate::util::hash::ObjectHash;

/// Realize `build_def` into `<store>/build/<hash>`.
///
/// A complete, unmodified entry is reused. Anything else at that path is
/// removed and the build runs from scratch. If an action fails the entry is
/// removed again, so only finished builds ever carry a marker.
pub async fn realize_build(
  hash: &ObjectHash,
  build_def: &BuildDef,
  completed: &HashMap<ObjectHash, BuildResult>,
  config: &ExecuteConfig,
) -> Result<BuildResult, ExecuteError> {
  info!(name = %build_def.display_name(), hash = %hash, system = %build_def.system, "realizing build");

  let store_path = build_path(&config.store, hash);

  if store_path.exists() {
    match read_marker(&store_path) {
      Ok(Some(marker)) if verify(&store_path, &marker) => {
        debug!(path = %store_path.display(), "cache hit");
        let resolver = BuildResolver::new(completed, &store_path);
        let outputs = resolve_outputs(build_def, &store_path, &resolver)?;
        return Ok(BuildResult {
          store_path,
          outputs,
          action_results: vec![],
          cached: true,
        });
      }
      Ok(Some(_)) => debug!(path = %store_path.display(), "removing corrupted entry"),
      Ok(None) => debug!(path = %store_path.display(), "removing incomplete entry"),
      Err(e) => debug!(path = %store_path.display(), error = %e, "removing entry with invalid marker"),
    }
    fs::remove_dir_all(&store_path).await?;
  }

  if !build_def.system.is_host() {
    return Err(ExecuteError::PlatformMismatch {
      build: build_def.display_name(),
      system: build_def.system.triple(),
      host: System::current().map(|s| s.triple()).unwrap_or_else(|| "unknown".to_string()),
    });
  }

  let build_env = BuildEnv::resolve(build_def, completed, config)?;

  fs::create_dir_all(&store_path).await?;
  match run_actions(build_def, completed, &store_path, &build_env).await {
    Ok(result) => Ok(result),
    Err(e) => {
      if let Err(cleanup) = fs::remove_dir_all(&store_path).await {
        warn!(path = %store_path.display(), error = %cleanup, "failed to remove failed build");
      }
      Err(e)
    }
  }
}

async fn run_actions(
  build_def: &BuildDef,
  completed: &HashMap<ObjectHash, BuildResult>,
  store_path: &Path,
  build_env: &BuildEnv,
) -> Result<BuildResult, ExecuteError> {
  let mut resolver = BuildResolver::new(completed, store_path);
  let mut action_results = Vec::new();

  for (idx, action) in build_def.actions.iter().enumerate() {
    debug!(action = idx, "executing action");
    let result = execute_action(action, &resolver, store_path, build_env).await?;
    resolver.push_action_result(result.output.clone());
    action_results.push(result);
  }

  let outputs = resolve_outputs(build_def, store_path, &resolver)?;

  let tmp = store_path.join(BUILD_TMP_DIR);
  if fs::try_exists(&tmp).await.unwrap_or(false) {
    fs::remove_dir_all(&tmp).await?;
  }

  let entry = store_path.to_path_buf();
  tokio::task::spawn_blocking(move || write_marker(&entry))
    .await
    .map_err(|e| ExecuteError::Io(std::io::Error::other(e)))??;

  info!(name = %build_def.display_name(), path = %store_path.display(), "build complete");
  Ok(BuildResult {
    store_path: store_path.to_path_buf(),
    outputs,
    action_results,
    cached: false,
  })
}

/// `out` plus the definition's outputs with placeholders substituted.
fn resolve_outputs(
  build_def: &BuildDef,
  store_path: &Path,
  resolver: &BuildResolver<'_>,
) -> Result<BTreeMap<String, String>, ExecuteError> {
  let mut outputs = BTreeMap::new();
  outputs.insert("out".to_string(), store_path.to_string_lossy().to_string());
  for (name, value) in &build_def.outputs {
    outputs.insert(name.clone(), placeholder::substitute(value, resolver)?);
  }
  Ok(outputs)
}
