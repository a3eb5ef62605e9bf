//! Errors, results and configuration of build realization.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::build::source::SourceError;
use crate::build::store::MarkerError;
use crate::pkgs::{IndexChain, PackageIndex};
use crate::placeholder::PlaceholderError;
use crate::platform::paths::store_dir;
use crate::toolchain::ToolchainError;
use crate::util::hash::ObjectHash;

#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error("placeholder error: {0}")]
  Placeholder(#[from] PlaceholderError),

  #[error("command failed with exit code {code:?}: {cmd}{}", stderr_suffix(.stderr))]
  CmdFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to copy {from} to {to}: {source}")]
  Copy {
    from: String,
    to: String,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Source(#[from] SourceError),

  #[error("source {path} changed since evaluation (expected {expected}, found {actual})")]
  SourceChanged {
    path: String,
    expected: String,
    actual: String,
  },

  #[error("binary '{name}' was not produced in {dir}")]
  MissingBinary { name: String, dir: String },

  #[error("store marker: {0}")]
  Marker(#[from] MarkerError),

  #[error("toolchain unavailable: {0}")]
  ToolchainUnavailable(#[from] ToolchainError),

  #[error("package '{name}' is not available for {system}")]
  PackageUnavailable { name: String, system: String },

  #[error("build {build} targets {system}, which cannot be built on {host}")]
  PlatformMismatch {
    build: String,
    system: String,
    host: String,
  },

  #[error("dependency failed: {0}")]
  DependencyFailed(ObjectHash),

  #[error("dependency cycle detected")]
  CycleDetected,

  #[error("build not found: {0}")]
  BuildNotFound(ObjectHash),
}

fn stderr_suffix(stderr: &str) -> String {
  if stderr.is_empty() {
    String::new()
  } else {
    format!("\n{}", stderr)
  }
}

#[derive(Debug, Clone)]
pub struct ActionResult {
  /// Trimmed stdout for commands, the destination path for copies.
  pub output: String,
}

#[derive(Debug, Clone)]
pub struct BuildResult {
  pub store_path: PathBuf,
  /// Output name to resolved value. Always contains `out`.
  pub outputs: BTreeMap<String, String>,
  pub action_results: Vec<ActionResult>,
  /// Whether the entry was already in the store.
  pub cached: bool,
}

#[derive(Debug, Default)]
pub struct DagResult {
  pub realized: HashMap<ObjectHash, BuildResult>,
  pub failed: Vec<(ObjectHash, ExecuteError)>,
  /// Skipped build to the failed dependency that caused the skip.
  pub skipped: HashMap<ObjectHash, ObjectHash>,
}

impl DagResult {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  pub fn total(&self) -> usize {
    self.realized.len() + self.failed.len() + self.skipped.len()
  }
}

#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of builds realized at once.
  pub parallelism: usize,
  pub store: PathBuf,
  /// Where tools and link inputs are looked up.
  pub index: Arc<dyn PackageIndex>,
  /// `PATH`-style list searched for a host toolchain.
  pub search_path: OsString,
}

impl ExecuteConfig {
  pub fn new(store: PathBuf, index: Arc<dyn PackageIndex>) -> Self {
    Self {
      parallelism: default_parallelism(),
      store,
      index,
      search_path: std::env::var_os("PATH").unwrap_or_default(),
    }
  }

  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self::new(store_dir(), Arc::new(IndexChain::standard(None)))
  }
}

/// `FLINT_PARALLELISM`, else the number of CPUs.
fn default_parallelism() -> usize {
  std::env::var("FLINT_PARALLELISM")
    .ok()
    .and_then(|v| v.parse::<usize>().ok())
    .filter(|n| *n > 0)
    .unwrap_or_else(|| std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4))
}
