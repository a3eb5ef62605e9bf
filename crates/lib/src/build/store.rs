//! Build entries in the store (`<store>/build/<hash>/`).
//!
//! An entry is valid only once its completion marker exists. The marker
//! records a hash of the entry's contents so later reads can detect tampering.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::{BUILD_COMPLETE_MARKER, BUILD_TMP_DIR};
use crate::util::hash::{DirHashError, ObjectHash, hash_directory};

/// Excluded when hashing an entry: the marker itself, scratch space and
/// bytecode caches interpreters write at run time.
const OUTPUT_HASH_EXCLUSIONS: &[&str] = &[BUILD_COMPLETE_MARKER, BUILD_TMP_DIR, "__pycache__"];

const MARKER_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum MarkerError {
  #[error("failed to read marker in {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write marker in {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid marker in {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error(transparent)]
  Hash(#[from] DirHashError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMarker {
  pub version: u32,
  pub status: String,
  /// Full SHA-256 of the entry, see [`hash_output`].
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output_hash: Option<String>,
}

pub fn build_path(store: &Path, hash: &ObjectHash) -> PathBuf {
  store.join("build").join(hash.as_str())
}

/// Hashes of every entry directory in the store, complete or not.
pub fn list_builds(store: &Path) -> std::io::Result<Vec<ObjectHash>> {
  let dir = store.join("build");
  if !dir.is_dir() {
    return Ok(Vec::new());
  }
  let mut hashes = Vec::new();
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    if entry.file_type()?.is_dir() {
      hashes.push(ObjectHash(entry.file_name().to_string_lossy().to_string()));
    }
  }
  hashes.sort();
  Ok(hashes)
}

pub fn hash_output(entry: &Path) -> Result<String, DirHashError> {
  Ok(hash_directory(entry, OUTPUT_HASH_EXCLUSIONS)?.0)
}

pub fn write_marker(entry: &Path) -> Result<BuildMarker, MarkerError> {
  let marker = BuildMarker {
    version: MARKER_VERSION,
    status: "complete".to_string(),
    output_hash: Some(hash_output(entry)?),
  };
  let path = entry.join(BUILD_COMPLETE_MARKER);
  let content = serde_json::to_string(&marker).map_err(|e| MarkerError::Parse {
    path: path.clone(),
    message: e.to_string(),
  })?;
  fs::write(&path, format!("{}\n", content)).map_err(|source| MarkerError::Write { path, source })?;
  Ok(marker)
}

/// `Ok(None)` when the entry has no marker (never finished).
pub fn read_marker(entry: &Path) -> Result<Option<BuildMarker>, MarkerError> {
  let path = entry.join(BUILD_COMPLETE_MARKER);
  let content = match fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(source) => return Err(MarkerError::Read { path, source }),
  };
  serde_json::from_str(&content)
    .map(Some)
    .map_err(|e| MarkerError::Parse {
      path,
      message: e.to_string(),
    })
}

pub fn is_complete(entry: &Path) -> bool {
  matches!(read_marker(entry), Ok(Some(_)))
}

/// Whether the entry still matches the hash its marker recorded.
///
/// Markers without a hash are trusted.
pub fn verify(entry: &Path, marker: &BuildMarker) -> bool {
  let Some(expected) = &marker.output_hash else {
    debug!(path = %entry.display(), "marker without output hash, trusting entry");
    return true;
  };

  match hash_output(entry) {
    Ok(actual) if actual == *expected => true,
    Ok(actual) => {
      warn!(path = %entry.display(), expected = %expected, actual = %actual, "store entry corrupted");
      false
    }
    Err(e) => {
      warn!(path = %entry.display(), error = %e, "failed to hash store entry");
      false
    }
  }
}
