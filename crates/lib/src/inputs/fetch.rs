//! Git checkout and local path resolution for inputs.
//!
//! Git inputs are cloned once into `<cache>/inputs/<name>-<urlhash>/` and
//! fetched incrementally afterwards. The URL hash keeps two inputs that share
//! a name but not a remote from clobbering each other. The pinned commit is
//! exported to `<cache>/inputs/snapshots/<commit>/`, which is what evaluation
//! reads.

use std::fs;
use std::path::{Path, PathBuf};

use gix::remote::Direction;
use thiserror::Error;
use tracing::{debug, info};

use crate::platform::paths::home_dir;
use crate::util::fs::make_executable;
use crate::util::hash::hash_bytes;

const CACHE_SUFFIX_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to create cache directory '{0}': {1}")]
  CreateCacheDir(PathBuf, #[source] std::io::Error),

  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  #[error("failed to fetch from '{url}': {source}")]
  Fetch {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("revision '{rev}' not found in repository")]
  RevisionNotFound { rev: String },

  #[error("failed to check out '{rev}': {source}")]
  Checkout {
    rev: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to resolve HEAD: {0}")]
  ResolveHead(String),

  #[error("path does not exist: {0}")]
  PathNotFound(PathBuf),

  #[error("failed to resolve path '{path}': {source}")]
  CanonicalizePath {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("no remote configured for repository")]
  NoRemote,
}

/// Cache directory for a git input. `/` in transitive paths becomes `-`.
pub fn checkout_dir(cache_dir: &Path, name: &str, url: &str) -> PathBuf {
  let digest = hash_bytes(url.as_bytes());
  cache_dir.join(format!("{}-{}", name.replace('/', "-"), &digest.0[..CACHE_SUFFIX_LEN]))
}

/// Clone or update a git input and export `rev` (HEAD when `None`).
///
/// Returns the snapshot directory of that commit and its full hash.
pub fn fetch_git(name: &str, url: &str, rev: Option<&str>, cache_dir: &Path) -> Result<(PathBuf, String), FetchError> {
  fs::create_dir_all(cache_dir).map_err(|e| FetchError::CreateCacheDir(cache_dir.to_path_buf(), e))?;
  let repo_path = checkout_dir(cache_dir, name, url);

  let repo = if repo_path.join(".git").exists() {
    debug!(name, path = %repo_path.display(), "updating cached checkout");
    let repo = gix::open(&repo_path).map_err(|e| FetchError::Open {
      path: repo_path.clone(),
      source: Box::new(e),
    })?;
    fetch_updates(&repo, url)?;
    repo
  } else {
    info!(name, url, "cloning input");
    clone_repo(url, &repo_path)?
  };

  let commit = resolve_revision(&repo, rev)?;
  let snapshot = snapshot_commit(&repo, cache_dir, &commit)?;

  debug!(name, rev = %commit, path = %snapshot.display(), "resolved revision");
  Ok((snapshot, commit))
}

fn clone_repo(url: &str, dest: &Path) -> Result<gix::Repository, FetchError> {
  let clone_err = |e: Box<dyn std::error::Error + Send + Sync>| FetchError::Clone {
    url: url.to_string(),
    source: e,
  };

  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| clone_err(Box::new(e)))?;
  let (mut checkout, _) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| clone_err(Box::new(e)))?;
  let (repo, _) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::Checkout {
      rev: "HEAD".to_string(),
      source: Box::new(e),
    })?;
  Ok(repo)
}

fn fetch_updates(repo: &gix::Repository, url: &str) -> Result<(), FetchError> {
  let fetch_err = |e: Box<dyn std::error::Error + Send + Sync>| FetchError::Fetch {
    url: url.to_string(),
    source: e,
  };

  let remote = repo
    .find_default_remote(Direction::Fetch)
    .ok_or(FetchError::NoRemote)?
    .map_err(|e| fetch_err(Box::new(e)))?;
  remote
    .connect(Direction::Fetch)
    .map_err(|e| fetch_err(Box::new(e)))?
    .prepare_fetch(gix::progress::Discard, Default::default())
    .map_err(|e| fetch_err(Box::new(e)))?
    .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| fetch_err(Box::new(e)))?;
  Ok(())
}

fn resolve_revision(repo: &gix::Repository, rev: Option<&str>) -> Result<String, FetchError> {
  match rev {
    Some(spec) => {
      let parsed = repo.rev_parse(spec).map_err(|_| FetchError::RevisionNotFound {
        rev: spec.to_string(),
      })?;
      let id = parsed.single().ok_or_else(|| FetchError::RevisionNotFound {
        rev: format!("{} (ambiguous)", spec),
      })?;
      let object = id.object().map_err(|e| FetchError::RevisionNotFound {
        rev: format!("{}: {}", spec, e),
      })?;
      let commit = object.peel_to_commit().map_err(|e| FetchError::RevisionNotFound {
        rev: format!("{}: {}", spec, e),
      })?;
      Ok(commit.id.to_string())
    }
    None => {
      let mut head = repo.head().map_err(|e| FetchError::ResolveHead(e.to_string()))?;
      let commit = head
        .peel_to_commit()
        .map_err(|e| FetchError::ResolveHead(e.to_string()))?;
      Ok(commit.id.to_string())
    }
  }
}

/// Export the tree of `commit` into `<cache>/snapshots/<commit>`.
///
/// Snapshots are immutable and shared by every input pinned to that commit.
fn snapshot_commit(repo: &gix::Repository, cache_dir: &Path, commit: &str) -> Result<PathBuf, FetchError> {
  let dest = cache_dir.join("snapshots").join(commit);
  if dest.exists() {
    return Ok(dest);
  }

  let checkout_err = |e: Box<dyn std::error::Error + Send + Sync>| FetchError::Checkout {
    rev: commit.to_string(),
    source: e,
  };

  let id = gix::ObjectId::from_hex(commit.as_bytes()).map_err(|e| checkout_err(Box::new(e)))?;
  let tree = repo
    .find_commit(id)
    .map_err(|e| checkout_err(Box::new(e)))?
    .tree()
    .map_err(|e| checkout_err(Box::new(e)))?;

  let mut recorder = gix::traverse::tree::Recorder::default();
  tree
    .traverse()
    .breadthfirst(&mut recorder)
    .map_err(|e| checkout_err(Box::new(e)))?;

  let parent = cache_dir.join("snapshots");
  fs::create_dir_all(&parent).map_err(|e| FetchError::CreateCacheDir(parent.clone(), e))?;
  let staging = tempfile::tempdir_in(&parent).map_err(|e| checkout_err(Box::new(e)))?;

  for entry in recorder.records {
    let rel = PathBuf::from(entry.filepath.to_string());
    let target = staging.path().join(&rel);
    match entry.mode.kind() {
      gix::object::tree::EntryKind::Tree => {
        fs::create_dir_all(&target).map_err(|e| checkout_err(Box::new(e)))?;
      }
      gix::object::tree::EntryKind::Blob | gix::object::tree::EntryKind::BlobExecutable => {
        let blob = repo.find_object(entry.oid).map_err(|e| checkout_err(Box::new(e)))?;
        if let Some(dir) = target.parent() {
          fs::create_dir_all(dir).map_err(|e| checkout_err(Box::new(e)))?;
        }
        fs::write(&target, &blob.data).map_err(|e| checkout_err(Box::new(e)))?;
        if entry.mode.kind() == gix::object::tree::EntryKind::BlobExecutable {
          make_executable(&target).map_err(|e| checkout_err(Box::new(e)))?;
        }
      }
      // Symlinks and submodules are not materialized.
      _ => {}
    }
  }

  let staged = staging.keep();
  fs::rename(&staged, &dest).map_err(|e| checkout_err(Box::new(e)))?;
  Ok(dest)
}

/// Resolve a `path:` input relative to the flake directory, expanding `~`.
pub fn resolve_path(path_str: &str, config_dir: &Path) -> Result<PathBuf, FetchError> {
  let expanded = if let Some(rest) = path_str.strip_prefix("~/") {
    home_dir().join(rest)
  } else if path_str == "~" {
    home_dir()
  } else if Path::new(path_str).is_absolute() {
    PathBuf::from(path_str)
  } else {
    config_dir.join(path_str)
  };

  let canonical = dunce::canonicalize(&expanded).map_err(|e| {
    if e.kind() == std::io::ErrorKind::NotFound {
      FetchError::PathNotFound(expanded.clone())
    } else {
      FetchError::CanonicalizePath {
        path: expanded.clone(),
        source: e,
      }
    }
  })?;

  debug!(path = %canonical.display(), "resolved path input");
  Ok(canonical)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  mod resolve_path_tests {
    use super::*;

    #[test]
    #[serial]
    #[cfg(unix)]
    fn tilde_expansion() {
      let temp_dir = TempDir::new().unwrap();
      let index = temp_dir.path().join("pkg-index");
      fs::create_dir(&index).unwrap();

      temp_env::with_var("HOME", Some(temp_dir.path().to_str().unwrap()), || {
        let result = resolve_path("~/pkg-index", Path::new("/unused")).unwrap();
        assert_eq!(result, dunce::canonicalize(&index).unwrap());
      });
    }

    #[test]
    fn relative_to_flake_dir() {
      let temp_dir = TempDir::new().unwrap();
      let overlay = temp_dir.path().join("overlay");
      fs::create_dir(&overlay).unwrap();

      let result = resolve_path("./overlay", temp_dir.path()).unwrap();
      assert_eq!(result, dunce::canonicalize(&overlay).unwrap());
    }

    #[test]
    fn missing_path_is_reported() {
      let result = resolve_path("/nonexistent/flint/input", Path::new("/unused"));
      assert!(matches!(result, Err(FetchError::PathNotFound(_))));
    }
  }

  mod checkout_dir_tests {
    use super::*;

    #[test]
    fn distinct_urls_get_distinct_dirs() {
      let cache = Path::new("/cache");
      let a = checkout_dir(cache, "pkgs", "https://a.example/pkgs.git");
      let b = checkout_dir(cache, "pkgs", "https://b.example/pkgs.git");
      assert_ne!(a, b);
      assert!(a.file_name().unwrap().to_str().unwrap().starts_with("pkgs-"));
    }

    #[test]
    fn nested_names_are_flattened() {
      let dir = checkout_dir(Path::new("/cache"), "overlay/pkgs", "u");
      assert_eq!(dir.parent().unwrap(), Path::new("/cache"));
      assert!(dir.file_name().unwrap().to_str().unwrap().starts_with("overlay-pkgs-"));
    }
  }

  mod git {
    use super::*;
    use std::process::Command;

    fn git_available() -> bool {
      Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
    }

    fn git(dir: &Path, args: &[&str]) -> String {
      let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "t")
        .env("GIT_AUTHOR_EMAIL", "t@example.com")
        .env("GIT_COMMITTER_NAME", "t")
        .env("GIT_COMMITTER_EMAIL", "t@example.com")
        .output()
        .unwrap();
      assert!(out.status.success(), "git {:?} failed", args);
      String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    #[test]
    fn clones_local_repository_and_pins_revision() {
      if !git_available() {
        return;
      }
      let origin = TempDir::new().unwrap();
      git(origin.path(), &["init", "-q"]);
      fs::write(origin.path().join("README"), "v1").unwrap();
      git(origin.path(), &["add", "."]);
      git(origin.path(), &["commit", "-q", "-m", "one"]);
      let first = git(origin.path(), &["rev-parse", "HEAD"]);
      fs::write(origin.path().join("README"), "v2").unwrap();
      git(origin.path(), &["commit", "-q", "-am", "two"]);
      let second = git(origin.path(), &["rev-parse", "HEAD"]);

      let cache = TempDir::new().unwrap();
      let url = origin.path().to_str().unwrap();

      let (path, head) = fetch_git("pkgs", url, None, cache.path()).unwrap();
      assert_eq!(head, second);
      assert_eq!(fs::read_to_string(path.join("README")).unwrap(), "v2");

      let (path, pinned) = fetch_git("pkgs", url, Some(&first), cache.path()).unwrap();
      assert_eq!(pinned, first);
      assert_eq!(fs::read_to_string(path.join("README")).unwrap(), "v1");
    }

    #[test]
    fn annotated_tag_pins_its_commit() {
      if !git_available() {
        return;
      }
      let origin = TempDir::new().unwrap();
      git(origin.path(), &["init", "-q"]);
      fs::write(origin.path().join("README"), "tagged").unwrap();
      git(origin.path(), &["add", "."]);
      git(origin.path(), &["commit", "-q", "-m", "one"]);
      git(origin.path(), &["tag", "-a", "v1", "-m", "release"]);
      let commit = git(origin.path(), &["rev-parse", "HEAD"]);
      let tag_object = git(origin.path(), &["rev-parse", "v1"]);
      assert_ne!(commit, tag_object);

      let cache = TempDir::new().unwrap();
      let (path, pinned) = fetch_git("pkgs", origin.path().to_str().unwrap(), Some("v1"), cache.path()).unwrap();
      assert_eq!(pinned, commit);
      assert_eq!(fs::read_to_string(path.join("README")).unwrap(), "tagged");
    }

    #[test]
    fn unknown_revision_is_reported() {
      if !git_available() {
        return;
      }
      let origin = TempDir::new().unwrap();
      git(origin.path(), &["init", "-q"]);
      fs::write(origin.path().join("README"), "x").unwrap();
      git(origin.path(), &["add", "."]);
      git(origin.path(), &["commit", "-q", "-m", "one"]);

      let cache = TempDir::new().unwrap();
      let err = fetch_git("pkgs", origin.path().to_str().unwrap(), Some("no-such-branch"), cache.path()).unwrap_err();
      assert!(matches!(err, FetchError::RevisionNotFound { .. }));
    }
  }
}
