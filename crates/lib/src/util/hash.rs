//! Hashing for the content-addressed store.
//!
//! - [`ObjectHash`] names a store entry: a truncated SHA-256 of a definition.
//! - [`ContentHash`] is a full SHA-256 used to verify trees and files.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// Store-path identifier derived from a serialized definition.
///
/// Lowercase hex, [`OBJ_HASH_PREFIX_LEN`] characters long.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl ObjectHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Anything whose JSON form determines its identity.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let json = serde_json::to_vec(self)?;
    let full = hash_bytes(&json);
    Ok(ObjectHash(full.0[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// Full 64-character SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk {path}: {message}")]
  Walk { path: String, message: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Hash a directory tree by relative path, file content and symlink target.
///
/// Timestamps and permissions are ignored. Entries whose file name appears in
/// `exclude` are skipped together with everything beneath them.
pub fn hash_directory(root: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let mut hasher = Sha256::new();

  let walker = WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || !e.file_name().to_str().is_some_and(|n| exclude.contains(&n)));

  for entry in walker {
    let entry = entry.map_err(|e| DirHashError::Walk {
      path: root.display().to_string(),
      message: e.to_string(),
    })?;
    if entry.depth() == 0 {
      continue;
    }

    let rel = relative_key(root, entry.path());
    let kind = entry.file_type();
    let line = if kind.is_symlink() {
      let target = fs::read_link(entry.path()).map_err(|source| DirHashError::Read {
        path: entry.path().display().to_string(),
        source,
      })?;
      format!("L:{}:{}", rel, target.to_string_lossy())
    } else if kind.is_dir() {
      format!("D:{}", rel)
    } else if kind.is_file() {
      format!("F:{}:{}", rel, hash_file(entry.path())?)
    } else {
      continue;
    };

    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a selected set of files under `root`, keyed by their relative path.
///
/// Used to fingerprint dependency manifests independently of the rest of
/// the tree. Paths are sorted before hashing.
pub fn hash_files(root: &Path, files: &[&Path]) -> Result<ContentHash, DirHashError> {
  let mut keyed: Vec<(String, &Path)> = files.iter().map(|p| (relative_key(root, p), *p)).collect();
  keyed.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (rel, path) in keyed {
    hasher.update(format!("F:{}:{}\n", rel, hash_file(path)?).as_bytes());
  }
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_err = |source| DirHashError::Read {
    path: path.display().to_string(),
    source,
  };
  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 8192];
  loop {
    let n = file.read(&mut buf).map_err(read_err)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}

/// Forward-slash relative path so hashes agree across platforms.
fn relative_key(root: &Path, path: &Path) -> String {
  let rel = path.strip_prefix(root).unwrap_or(path);
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}
