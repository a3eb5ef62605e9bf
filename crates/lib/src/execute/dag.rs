//! Dependency ordering of builds.
//!
//! Edges run from a dependency to its dependents. Realization proceeds in
//! waves: every build in a wave depends only on builds of earlier waves.

use std::collections::{BTreeMap, HashMap};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::manifest::Manifest;
use crate::util::hash::ObjectHash;

use super::types::ExecuteError;

pub struct ExecutionDag {
  graph: DiGraph<ObjectHash, ()>,
  nodes: BTreeMap<ObjectHash, NodeIndex>,
}

impl ExecutionDag {
  /// Dependencies that are not part of `manifest` are reported as missing.
  pub fn from_manifest(manifest: &Manifest) -> Result<Self, ExecuteError> {
    let mut graph = DiGraph::new();
    let mut nodes = BTreeMap::new();

    for hash in manifest.builds.keys() {
      nodes.insert(hash.clone(), graph.add_node(hash.clone()));
    }

    for (hash, def) in &manifest.builds {
      let dependent = nodes[hash];
      for dep in &def.deps {
        let Some(&dep_idx) = nodes.get(dep) else {
          return Err(ExecuteError::BuildNotFound(dep.clone()));
        };
        graph.update_edge(dep_idx, dependent, ());
      }
    }

    toposort(&graph, None).map_err(|_| ExecuteError::CycleDetected)?;
    Ok(Self { graph, nodes })
  }

  /// Builds grouped into levels; a build's level is one past its deepest dependency.
  pub fn waves(&self) -> Result<Vec<Vec<ObjectHash>>, ExecuteError> {
    let order = toposort(&self.graph, None).map_err(|_| ExecuteError::CycleDetected)?;
    let mut level: HashMap<NodeIndex, usize> = HashMap::new();

    for idx in order {
      let depth = self
        .graph
        .neighbors_directed(idx, Direction::Incoming)
        .filter_map(|dep| level.get(&dep))
        .map(|l| l + 1)
        .max()
        .unwrap_or(0);
      level.insert(idx, depth);
    }

    let count = level.values().max().map(|m| m + 1).unwrap_or(0);
    let mut waves = vec![Vec::new(); count];
    for (hash, idx) in &self.nodes {
      waves[level[idx]].push(hash.clone());
    }
    Ok(waves)
  }

  pub fn dependencies(&self, hash: &ObjectHash) -> Vec<ObjectHash> {
    let Some(&idx) = self.nodes.get(hash) else {
      return Vec::new();
    };
    let mut deps: Vec<ObjectHash> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|d| self.graph[d].clone())
      .collect();
    deps.sort();
    deps
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}
