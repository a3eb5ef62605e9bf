//! The `flint.lock` file.
//!
//! Pins every input (root and transitive, keyed by path) to a revision and
//! records which transitive inputs were redirected with `follows`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "inputs": {
//!     "pkgs": {
//!       "type": "git",
//!       "url": "git:https://example.com/pkgs.git",
//!       "rev": "a1b2c3...",
//!       "lastModified": 1733667300
//!     }
//!   },
//!   "follows": { "rust_overlay/pkgs": "pkgs" }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LOCK_VERSION: u32 = 1;

pub const LOCK_FILENAME: &str = "flint.lock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
  pub version: u32,
  pub inputs: BTreeMap<String, LockedInput>,
  /// Transitive input path -> the input path it resolves to.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub follows: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedInput {
  #[serde(rename = "type")]
  pub type_: String,
  pub url: String,
  pub rev: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_modified: Option<u64>,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to read lock file: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write lock file: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse lock file: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize lock file: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported lock file version {0}, expected {LOCK_VERSION}")]
  UnsupportedVersion(u32),
}

impl Default for LockFile {
  fn default() -> Self {
    Self::new()
  }
}

impl LockFile {
  pub fn new() -> Self {
    Self {
      version: LOCK_VERSION,
      inputs: BTreeMap::new(),
      follows: BTreeMap::new(),
    }
  }

  /// Returns `Ok(None)` when no lock file exists yet.
  pub fn load(path: &Path) -> Result<Option<Self>, LockError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(LockError::Read(e)),
    };

    let lock: LockFile = serde_json::from_str(&content).map_err(LockError::Parse)?;
    if lock.version != LOCK_VERSION {
      return Err(LockError::UnsupportedVersion(lock.version));
    }
    Ok(Some(lock))
  }

  pub fn save(&self, path: &Path) -> Result<(), LockError> {
    let mut content = serde_json::to_string_pretty(self).map_err(LockError::Serialize)?;
    content.push('\n');
    fs::write(path, content).map_err(LockError::Write)
  }

  pub fn get(&self, path: &str) -> Option<&LockedInput> {
    self.inputs.get(path)
  }

  pub fn insert(&mut self, path: String, input: LockedInput) {
    self.inputs.insert(path, input);
  }

  /// Same pins, ignoring fetch timestamps.
  pub fn same_pins(&self, other: &LockFile) -> bool {
    self.follows == other.follows
      && self.inputs.len() == other.inputs.len()
      && self.inputs.iter().all(|(name, a)| {
        other
          .inputs
          .get(name)
          .is_some_and(|b| a.type_ == b.type_ && a.url == b.url && a.rev == b.rev)
      })
  }
}

impl LockedInput {
  pub fn new(type_: &str, url: &str, rev: &str) -> Self {
    Self {
      type_: type_.to_string(),
      url: url.to_string(),
      rev: rev.to_string(),
      last_modified: None,
    }
  }

  pub fn with_last_modified(mut self, timestamp: u64) -> Self {
    self.last_modified = Some(timestamp);
    self
  }
}
