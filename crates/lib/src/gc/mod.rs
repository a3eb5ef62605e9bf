//! Garbage collection of the build store.
//!
//! Every `flint build` and `flint develop` records a gc root: a JSON file
//! under `<data>/roots/` listing the closure of builds it realized. Store
//! entries referenced by no root, and entries that never completed, are
//! removed. Roots whose flake file no longer exists are dropped first.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build::store::{build_path, is_complete, list_builds};
use crate::util::fs::dir_size;
use crate::util::hash::{ObjectHash, hash_bytes};

const ROOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum GcError {
  #[error("failed to read store: {0}")]
  ReadStore(#[source] io::Error),

  #[error("failed to read gc roots in {path}: {source}")]
  ReadRoots {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write gc root {path}: {source}")]
  WriteRoot {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A set of builds kept alive on behalf of one flake output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcRoot {
  pub version: u32,
  pub name: String,
  /// Directory of the flake that produced the builds.
  pub flake: PathBuf,
  pub builds: BTreeSet<ObjectHash>,
}

impl GcRoot {
  pub fn new(flake: &Path, label: &str, builds: BTreeSet<ObjectHash>) -> Self {
    Self {
      version: ROOT_VERSION,
      name: root_name(flake, label),
      flake: flake.to_path_buf(),
      builds,
    }
  }

  fn path_in(&self, roots_dir: &Path) -> PathBuf {
    roots_dir.join(format!("{}.json", self.name))
  }
}

/// Stable file name for a flake file plus an output label such as
/// `x86_64-linux.packages.default`.
pub fn root_name(flake: &Path, label: &str) -> String {
  let digest = hash_bytes(flake.to_string_lossy().as_bytes());
  let safe: String = label
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
    .collect();
  format!("{}-{}", &digest.0[..12], safe)
}

/// Write `root`, replacing an earlier root for the same output.
pub fn add_root(roots_dir: &Path, root: &GcRoot) -> Result<PathBuf, GcError> {
  let path = root.path_in(roots_dir);
  let write = || -> io::Result<()> {
    fs::create_dir_all(roots_dir)?;
    let json = serde_json::to_string_pretty(root).map_err(io::Error::other)?;
    fs::write(&path, json)
  };
  write().map_err(|source| GcError::WriteRoot {
    path: path.clone(),
    source,
  })?;
  debug!(root = %root.name, builds = root.builds.len(), "recorded gc root");
  Ok(path)
}

/// Every readable root. Unreadable files are skipped with a warning.
pub fn load_roots(roots_dir: &Path) -> Result<Vec<(PathBuf, GcRoot)>, GcError> {
  if !roots_dir.is_dir() {
    return Ok(Vec::new());
  }
  let read_err = |source| GcError::ReadRoots {
    path: roots_dir.to_path_buf(),
    source,
  };

  let mut roots = Vec::new();
  for entry in fs::read_dir(roots_dir).map_err(read_err)? {
    let path = entry.map_err(read_err)?.path();
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
      continue;
    }
    let parsed = fs::read_to_string(&path)
      .map_err(|e| e.to_string())
      .and_then(|s| serde_json::from_str::<GcRoot>(&s).map_err(|e| e.to_string()));
    match parsed {
      Ok(root) => roots.push((path, root)),
      Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable gc root"),
    }
  }
  roots.sort_by(|a, b| a.0.cmp(&b.0));
  Ok(roots)
}

#[derive(Debug, Default, Serialize)]
pub struct GcStats {
  pub builds_scanned: usize,
  pub builds_deleted: usize,
  pub bytes_freed: u64,
  pub roots_live: usize,
  pub roots_removed: usize,
}

#[derive(Debug, Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
}

/// Sweep `store` against the roots in `roots_dir`.
///
/// The caller holds the exclusive store lock. With `dry_run` nothing is
/// deleted but the result reports what would be.
pub fn collect_garbage(store: &Path, roots_dir: &Path, dry_run: bool) -> Result<GcResult, GcError> {
  let mut stats = GcStats::default();
  let mut deleted_paths = Vec::new();
  let mut live: HashSet<ObjectHash> = HashSet::new();

  for (path, root) in load_roots(roots_dir)? {
    if !root.flake.exists() {
      debug!(root = %root.name, flake = %root.flake.display(), "dropping stale gc root");
      stats.roots_removed += 1;
      if !dry_run && let Err(e) = fs::remove_file(&path) {
        warn!(path = %path.display(), error = %e, "failed to remove gc root");
      }
      deleted_paths.push(path);
      continue;
    }
    stats.roots_live += 1;
    live.extend(root.builds);
  }
  debug!(live = live.len(), "collected live builds");

  for hash in list_builds(store).map_err(GcError::ReadStore)? {
    stats.builds_scanned += 1;
    let path = build_path(store, &hash);
    let complete = is_complete(&path);
    if complete && live.contains(&hash) {
      continue;
    }

    let size = dir_size(&path);
    if complete {
      debug!(path = %path.display(), "removing unreferenced build");
    } else {
      debug!(path = %path.display(), "removing incomplete build");
    }

    if !dry_run && let Err(e) = fs::remove_dir_all(&path) {
      warn!(path = %path.display(), error = %e, "failed to delete build");
      continue;
    }
    stats.builds_deleted += 1;
    stats.bytes_freed += size;
    deleted_paths.push(path);
  }

  info!(
    builds_deleted = stats.builds_deleted,
    roots_removed = stats.roots_removed,
    bytes_freed = stats.bytes_freed,
    dry_run,
    "garbage collection complete"
  );
  Ok(GcResult { stats, deleted_paths })
}
