//! Transitive input graph and `follows` resolution.
//!
//! Nodes are keyed by their path from the root flake: `pkgs` for a root input,
//! `rust_overlay/pkgs` for the `pkgs` input of `rust_overlay`. An override of
//! the form `{ follows = "pkgs" }` on `rust_overlay` turns `rust_overlay/pkgs`
//! into an alias; aliases may chain up to [`MAX_FOLLOWS_DEPTH`] hops.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, trace};

use super::types::{InputDecl, InputDecls, InputOverride, MAX_FOLLOWS_DEPTH};

#[derive(Debug, Clone)]
pub struct GraphNode {
  /// Name as declared in the parent's inputs table.
  pub name: String,
  pub decl: InputDecl,
  /// Empty for root inputs.
  pub parent_path: String,
  pub full_path: String,
}

impl GraphNode {
  pub fn is_root_level(&self) -> bool {
    self.parent_path.is_empty()
  }

  pub fn depth(&self) -> usize {
    self.full_path.matches('/').count()
  }
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
  pub nodes: BTreeMap<String, GraphNode>,
  /// Parent path -> child paths.
  pub edges: BTreeMap<String, BTreeSet<String>>,
  /// Alias path -> final target path, filled by [`DependencyGraph::resolve_follows`].
  pub follows_resolved: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("follows target '{target}' not found (referenced from '{from}')")]
  FollowsTargetNotFound { from: String, target: String },

  #[error("circular follows detected: {chain}")]
  CircularFollows { chain: String },

  #[error("follows chain too deep (maximum {max} hops): {chain}")]
  FollowsChainTooDeep { max: usize, chain: String },

  #[error("invalid follows path '{path}': {reason}")]
  InvalidFollowsPath { path: String, reason: String },
}

pub fn join_path(parent: &str, name: &str) -> String {
  if parent.is_empty() {
    name.to_string()
  } else {
    format!("{}/{}", parent, name)
  }
}

impl DependencyGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_root_input(&mut self, name: &str, decl: InputDecl) {
    self.add_node(name, decl, "");
  }

  /// Add `name` as an input of the node at `parent_path`. Returns the new path.
  pub fn add_transitive(&mut self, name: &str, decl: InputDecl, parent_path: &str) -> String {
    let path = self.add_node(name, decl, parent_path);
    self
      .edges
      .entry(parent_path.to_string())
      .or_default()
      .insert(path.clone());
    path
  }

  fn add_node(&mut self, name: &str, decl: InputDecl, parent_path: &str) -> String {
    let full_path = join_path(parent_path, name);
    self.nodes.insert(
      full_path.clone(),
      GraphNode {
        name: name.to_string(),
        decl,
        parent_path: parent_path.to_string(),
        full_path: full_path.clone(),
      },
    );
    full_path
  }

  pub fn get(&self, path: &str) -> Option<&GraphNode> {
    self.nodes.get(path)
  }

  pub fn root_inputs(&self) -> Vec<&str> {
    self
      .nodes
      .values()
      .filter(|n| n.is_root_level())
      .map(|n| n.name.as_str())
      .collect()
  }

  pub fn children(&self, path: &str) -> Vec<&GraphNode> {
    self
      .edges
      .get(path)
      .map(|set| set.iter().filter_map(|p| self.nodes.get(p)).collect())
      .unwrap_or_default()
  }

  /// The direct `follows` target declared for `path` by its parent, if any.
  pub fn declared_follows(&self, path: &str) -> Option<&str> {
    let (parent, name) = path.rsplit_once('/')?;
    self
      .nodes
      .get(parent)?
      .decl
      .overrides()?
      .get(name)?
      .follows_path()
  }

  /// Whether `path` is an alias rather than an input that must be fetched.
  pub fn is_follows(&self, path: &str) -> bool {
    self.declared_follows(path).is_some()
  }

  /// Resolve every `follows` override to the concrete input it ends at.
  pub fn resolve_follows(&mut self) -> Result<(), GraphError> {
    let mut pending = Vec::new();
    for node in self.nodes.values() {
      if let Some(overrides) = node.decl.overrides() {
        for (dep, override_) in overrides {
          if let InputOverride::Follows(target) = override_ {
            pending.push((join_path(&node.full_path, dep), target.clone()));
          }
        }
      }
    }

    for (source, target) in pending {
      let resolved = self.follow_chain(&source, &target)?;
      debug!(source = %source, target = %resolved, "resolved follows");
      self.follows_resolved.insert(source, resolved);
    }
    Ok(())
  }

  fn follow_chain(&self, source: &str, first: &str) -> Result<String, GraphError> {
    let mut chain = vec![source.to_string()];
    let mut seen = BTreeSet::from([source.to_string()]);
    let mut current = first.to_string();

    for depth in 0..MAX_FOLLOWS_DEPTH {
      if current.is_empty() || current.split('/').any(str::is_empty) {
        return Err(GraphError::InvalidFollowsPath {
          path: current,
          reason: "path segments cannot be empty".to_string(),
        });
      }
      chain.push(current.clone());
      if !seen.insert(current.clone()) {
        return Err(GraphError::CircularFollows {
          chain: chain.join(" -> "),
        });
      }

      match self.declared_follows(&current) {
        Some(next) => {
          trace!(depth, current = %current, next, "following chain");
          current = next.to_string();
        }
        None if self.nodes.contains_key(&current) => return Ok(current),
        None => {
          return Err(GraphError::FollowsTargetNotFound {
            from: source.to_string(),
            target: current,
          });
        }
      }
    }

    Err(GraphError::FollowsChainTooDeep {
      max: MAX_FOLLOWS_DEPTH,
      chain: chain.join(" -> "),
    })
  }
}

pub fn build_initial_graph(root_inputs: &InputDecls) -> DependencyGraph {
  let mut graph = DependencyGraph::new();
  for (name, decl) in root_inputs {
    graph.add_root_input(name, decl.clone());
  }
  graph
}
