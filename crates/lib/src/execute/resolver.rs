//! Placeholder resolution while a build is realized.

use std::collections::HashMap;
use std::path::Path;

use crate::placeholder::{PlaceholderError, Resolver};
use crate::util::hash::ObjectHash;

use super::types::BuildResult;

/// Knows the current build's store path, its finished actions and every
/// dependency realized so far.
pub struct BuildResolver<'a> {
  completed: &'a HashMap<ObjectHash, BuildResult>,
  out_dir: String,
  action_results: Vec<String>,
}

impl<'a> BuildResolver<'a> {
  pub fn new(completed: &'a HashMap<ObjectHash, BuildResult>, out_dir: impl AsRef<Path>) -> Self {
    Self {
      completed,
      out_dir: out_dir.as_ref().to_string_lossy().to_string(),
      action_results: Vec::new(),
    }
  }

  pub fn push_action_result(&mut self, output: String) {
    self.action_results.push(output);
  }
}

impl Resolver for BuildResolver<'_> {
  fn resolve_out(&self) -> Result<&str, PlaceholderError> {
    Ok(&self.out_dir)
  }

  fn resolve_build(&self, hash: &str, output: &str) -> Result<&str, PlaceholderError> {
    self
      .completed
      .get(&ObjectHash(hash.to_string()))
      .and_then(|r| r.outputs.get(output))
      .map(String::as_str)
      .ok_or_else(|| PlaceholderError::UnresolvedBuild {
        hash: hash.to_string(),
        output: output.to_string(),
      })
  }

  fn resolve_action(&self, index: usize) -> Result<&str, PlaceholderError> {
    self
      .action_results
      .get(index)
      .map(String::as_str)
      .ok_or(PlaceholderError::UnresolvedAction(index))
  }
}
