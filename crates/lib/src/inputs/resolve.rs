//! Input resolution.
//!
//! Resolution walks the input graph breadth-first starting at the flake's
//! own inputs:
//!
//! 1. Parse the input's URL (a parent's `url` override wins).
//! 2. Pick a revision: the URL's explicit rev, else the locked rev, else HEAD.
//!    Inputs named in `force_update` ignore the lock.
//! 3. Fetch it, then read its own `flake.lua` (if any) for transitive inputs.
//!    Transitive inputs redirected with `follows` are never fetched.
//! 4. Resolve `follows` aliases and assemble the [`ResolvedInputs`] tree.
//!
//! A locked input whose URL no longer matches the declaration is an error
//! until the user runs `flint update`.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::fetch::{FetchError, fetch_git, resolve_path};
use super::graph::{DependencyGraph, GraphError, build_initial_graph, join_path};
use super::lock::{LOCK_FILENAME, LockError, LockFile, LockedInput};
use super::source::{InputSource, ParseError, parse, source_type};
use super::types::{InputDecl, InputDecls, InputOverride, MAX_FOLLOWS_DEPTH, ResolvedInput, ResolvedInputs};
use crate::consts::FLAKE_FILENAME;
use crate::lua::entrypoint::extract_input_decls;
use crate::platform::paths::inputs_cache_dir;

/// Which inputs should bypass the lock file.
#[derive(Debug, Clone, Default)]
pub enum ForceUpdate {
  #[default]
  None,
  All,
  Only(BTreeSet<String>),
}

impl ForceUpdate {
  fn applies_to(&self, path: &str) -> bool {
    match self {
      ForceUpdate::None => false,
      ForceUpdate::All => true,
      // Updating an input also re-resolves everything beneath it.
      ForceUpdate::Only(names) => names
        .iter()
        .any(|n| path == n || path.starts_with(&format!("{}/", n))),
    }
  }
}

#[derive(Debug)]
pub struct ResolutionResult {
  pub inputs: ResolvedInputs,
  pub lock_file: LockFile,
  /// Whether the pins differ from what was on disk.
  pub lock_changed: bool,
}

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("failed to parse input '{name}': {source}")]
  Parse {
    name: String,
    #[source]
    source: ParseError,
  },

  #[error("input '{name}' has no url")]
  MissingUrl { name: String },

  #[error("input '{name}' URL changed from '{locked_url}' to '{config_url}'. Run 'flint update {name}' to update.")]
  LockMismatch {
    name: String,
    locked_url: String,
    config_url: String,
  },

  #[error("failed to fetch input '{name}': {source}")]
  Fetch {
    name: String,
    #[source]
    source: FetchError,
  },

  #[error("failed to read inputs of '{name}': {message}")]
  Extract { name: String, message: String },

  #[error("input '{name}' is nested deeper than {max} levels")]
  TooDeep { name: String, max: usize },

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("unknown input '{0}'")]
  UnknownInput(String),

  #[error("failed to load lock file: {0}")]
  LoadLock(#[source] LockError),

  #[error("failed to save lock file: {0}")]
  SaveLock(#[source] LockError),
}

#[derive(Debug, Clone)]
struct Fetched {
  path: PathBuf,
  rev: String,
}

/// Resolve the inputs declared by the flake in `config_dir`.
pub fn resolve_inputs(
  decls: &InputDecls,
  config_dir: &Path,
  force_update: &ForceUpdate,
) -> Result<ResolutionResult, ResolveError> {
  resolve_inputs_with_cache(decls, config_dir, force_update, &inputs_cache_dir())
}

pub fn resolve_inputs_with_cache(
  decls: &InputDecls,
  config_dir: &Path,
  force_update: &ForceUpdate,
  cache_dir: &Path,
) -> Result<ResolutionResult, ResolveError> {
  if let ForceUpdate::Only(names) = force_update
    && let Some(unknown) = names.iter().find(|n| !decls.contains_key(*n))
  {
    return Err(ResolveError::UnknownInput(unknown.clone()));
  }

  let old_lock = LockFile::load(&config_dir.join(LOCK_FILENAME))
    .map_err(ResolveError::LoadLock)?
    .unwrap_or_default();
  let mut new_lock = LockFile::new();

  let mut graph = build_initial_graph(decls);
  let mut fetched: std::collections::BTreeMap<String, Fetched> = Default::default();
  let mut queue: VecDeque<String> = decls.keys().cloned().collect();

  info!(count = decls.len(), "resolving inputs");

  while let Some(path) = queue.pop_front() {
    let Some(node) = graph.get(&path).cloned() else {
      continue;
    };
    if node.depth() >= MAX_FOLLOWS_DEPTH {
      return Err(ResolveError::TooDeep {
        name: path,
        max: MAX_FOLLOWS_DEPTH,
      });
    }

    let url = node
      .decl
      .url()
      .ok_or_else(|| ResolveError::MissingUrl { name: path.clone() })?
      .to_string();
    let force = force_update.applies_to(&path);
    let locked = old_lock.get(&path);

    if !force
      && let Some(locked) = locked
      && locked.url != url
    {
      return Err(ResolveError::LockMismatch {
        name: path.clone(),
        locked_url: locked.url.clone(),
        config_url: url,
      });
    }

    // Relative `path:` inputs are relative to the flake that declares them.
    let base_dir = fetched
      .get(&node.parent_path)
      .map(|p| p.path.clone())
      .unwrap_or_else(|| config_dir.to_path_buf());
    let (entry, lock_entry) = resolve_one(&path, &url, locked, force, &base_dir, cache_dir)?;
    new_lock.insert(path.clone(), lock_entry);

    let child_decls = read_child_decls(&path, &entry.path)?;
    fetched.insert(path.clone(), entry);

    for (child, child_decl) in child_decls {
      let decl = match node.decl.overrides().and_then(|o| o.get(&child)) {
        Some(InputOverride::Url(u)) => InputDecl::Url(u.clone()),
        _ => child_decl,
      };
      let child_path = graph.add_transitive(&child, decl, &path);
      if graph.is_follows(&child_path) {
        debug!(input = %child_path, "skipping fetch of followed input");
      } else {
        queue.push_back(child_path);
      }
    }

    if let Some(overrides) = node.decl.overrides() {
      for name in overrides.keys() {
        if graph.get(&join_path(&path, name)).is_none() {
          warn!(input = %path, dep = %name, "override names an input the flake does not declare");
        }
      }
    }
  }

  graph.resolve_follows()?;
  for (alias, target) in &graph.follows_resolved {
    if graph.get(alias).is_some() {
      new_lock.follows.insert(alias.clone(), target.clone());
    }
  }

  let mut inputs = ResolvedInputs::new();
  for name in decls.keys() {
    inputs.insert(name.clone(), assemble(&graph, &fetched, name, 0)?);
  }

  let lock_changed = !old_lock.same_pins(&new_lock);
  Ok(ResolutionResult {
    inputs,
    lock_file: new_lock,
    lock_changed,
  })
}

fn resolve_one(
  path: &str,
  url: &str,
  locked: Option<&LockedInput>,
  force: bool,
  base_dir: &Path,
  cache_dir: &Path,
) -> Result<(Fetched, LockedInput), ResolveError> {
  debug!(input = path, url, "resolving input");
  let source = parse(url).map_err(|e| ResolveError::Parse {
    name: path.to_string(),
    source: e,
  })?;
  let kind = source_type(&source);

  let (dir, rev) = match &source {
    InputSource::Git { url: git_url, rev } => {
      let target = match (rev, locked, force) {
        (Some(rev), _, _) => Some(rev.as_str()),
        (None, Some(locked), false) => Some(locked.rev.as_str()),
        _ => None,
      };
      fetch_git(path, git_url, target, cache_dir).map_err(|e| ResolveError::Fetch {
        name: path.to_string(),
        source: e,
      })?
    }
    InputSource::Path { path: dir } => {
      let dir = resolve_path(&dir.to_string_lossy(), base_dir).map_err(|e| ResolveError::Fetch {
        name: path.to_string(),
        source: e,
      })?;
      (dir, "local".to_string())
    }
  };

  let entry = match locked {
    Some(l) if l.rev == rev && l.url == url && l.type_ == kind => l.clone(),
    _ => {
      info!(input = path, rev = %rev, "locking input");
      LockedInput::new(kind, url, &rev).with_last_modified(now())
    }
  };

  Ok((Fetched { path: dir, rev }, entry))
}

fn read_child_decls(name: &str, dir: &Path) -> Result<InputDecls, ResolveError> {
  let flake = dir.join(FLAKE_FILENAME);
  if !flake.is_file() {
    return Ok(InputDecls::new());
  }
  extract_input_decls(&flake).map_err(|e| ResolveError::Extract {
    name: name.to_string(),
    message: e.to_string(),
  })
}

fn assemble(
  graph: &DependencyGraph,
  fetched: &std::collections::BTreeMap<String, Fetched>,
  path: &str,
  depth: usize,
) -> Result<ResolvedInput, ResolveError> {
  if depth > MAX_FOLLOWS_DEPTH {
    return Err(ResolveError::TooDeep {
      name: path.to_string(),
      max: MAX_FOLLOWS_DEPTH,
    });
  }
  let concrete = graph
    .follows_resolved
    .get(path)
    .map(String::as_str)
    .unwrap_or(path);
  let entry = fetched
    .get(concrete)
    .ok_or_else(|| ResolveError::UnknownInput(concrete.to_string()))?;

  let mut resolved = ResolvedInput::new(entry.path.clone(), entry.rev.clone());
  for child in graph.children(concrete) {
    resolved
      .inputs
      .insert(child.name.clone(), assemble(graph, fetched, &child.full_path, depth + 1)?);
  }
  Ok(resolved)
}

fn now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

/// Write the lock file next to the flake if the pins changed.
pub fn save_lock_file_if_changed(result: &ResolutionResult, config_dir: &Path) -> Result<(), ResolveError> {
  if result.lock_changed {
    let lock_path = config_dir.join(LOCK_FILENAME);
    info!(path = %lock_path.display(), "writing lock file");
    result.lock_file.save(&lock_path).map_err(ResolveError::SaveLock)?;
  }
  Ok(())
}
