//! Subcommand implementations and the plumbing they share.

mod build;
mod check;
mod develop;
mod gc;
mod info;
mod lock;
mod run;
mod show;

use std::path::{Path, PathBuf};
use std::process::{ExitCode, ExitStatus};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::debug;

use flint_lib::eval::{EvalOptions, Evaluation, evaluate_flake};
use flint_lib::execute::{DagResult, ExecuteConfig, realize};
use flint_lib::gc::{GcRoot, add_root};
use flint_lib::manifest::Manifest;
use flint_lib::platform::System;
use flint_lib::platform::paths::{roots_dir, store_dir};
use flint_lib::store_lock::{LockMode, StoreLock};
use flint_lib::util::hash::ObjectHash;

use crate::output::{OutputFormat, print_error, print_skipped};

pub use build::cmd_build;
pub use check::cmd_check;
pub use develop::cmd_develop;
pub use gc::cmd_gc;
pub use info::cmd_info;
pub use lock::{cmd_lock, cmd_update};
pub use run::cmd_run;
pub use show::cmd_show;

/// Global options every subcommand sees.
pub struct Context {
  pub file: PathBuf,
  pub system: Option<System>,
  pub output: OutputFormat,
}

impl Context {
  /// `--system`, else the host.
  pub fn target_system(&self) -> Result<System> {
    match self.system {
      Some(system) => Ok(system),
      None => System::current().context("Unsupported host platform, pass --system"),
    }
  }

  pub fn evaluate(&self, opts: &EvalOptions) -> Result<Evaluation> {
    evaluate_flake(&self.file, opts).with_context(|| format!("Failed to evaluate {}", self.file.display()))
  }

  /// Evaluate the flake for the target system only.
  pub fn evaluate_target(&self) -> Result<(System, Evaluation)> {
    let system = self.target_system()?;
    let eval = self.evaluate(&EvalOptions::for_system(system))?;
    Ok((system, eval))
  }

  /// Directory holding the flake file.
  pub fn flake_dir(&self) -> PathBuf {
    match self.file.parent() {
      Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
      _ => PathBuf::from("."),
    }
  }
}

/// Hold the store lock shared for the duration of a build.
pub fn lock_store(command: &str) -> Result<StoreLock> {
  StoreLock::acquire(LockMode::Shared, command).context("Failed to acquire store lock")
}

/// Realize `roots` and everything they depend on.
pub fn realize_builds(eval: &Evaluation, roots: &[ObjectHash]) -> Result<DagResult> {
  let config = ExecuteConfig::new(store_dir(), Arc::new(eval.package_index()));
  debug!(roots = roots.len(), store = %config.store.display(), parallelism = config.parallelism, "realizing");
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(realize(&eval.manifest, roots, &config))
    .context("Failed to realize builds")
}

/// Record `roots` and their closure as live for `flint gc`.
pub fn register_root(eval: &Evaluation, label: &str, roots: &[ObjectHash]) -> Result<()> {
  let root = GcRoot::new(&eval.path, label, eval.manifest.closure(roots));
  add_root(&roots_dir(), &root).context("Failed to record gc root")?;
  Ok(())
}

/// Print every failed and skipped build of `result`.
pub fn report_failures(manifest: &Manifest, result: &DagResult) {
  let name = |hash: &ObjectHash| {
    manifest
      .get(hash)
      .map(|d| d.display_name())
      .unwrap_or_else(|| hash.to_string())
  };
  for (hash, err) in &result.failed {
    print_error(&format!("{} failed: {}", name(hash), err));
  }
  for (hash, cause) in &result.skipped {
    print_skipped(&format!("{} skipped: dependency {} failed", name(hash), name(cause)));
  }
}

/// Path of a program inside a store entry, allowing for `.exe` on Windows.
pub fn program_path(entry: &Path, program: &str) -> PathBuf {
  let path = entry.join(program);
  if cfg!(windows) && !path.exists() {
    return path.with_extension("exe");
  }
  path
}

pub fn exit_code(status: ExitStatus) -> ExitCode {
  match status.code() {
    Some(0) => ExitCode::SUCCESS,
    Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    None => ExitCode::FAILURE,
  }
}
