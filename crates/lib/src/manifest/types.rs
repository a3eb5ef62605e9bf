//! Manifest types.
//!
//! A [`Manifest`] holds every build a flake evaluation registered, across all
//! systems, keyed by content hash. Registering the same definition twice is a
//! no-op, which is how a package, the app that runs it and the check that
//! builds it all end up sharing one store entry.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::build::BuildDef;
use crate::util::hash::{HashError, Hashable, ObjectHash};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  pub builds: BTreeMap<ObjectHash, BuildDef>,
}

impl Hashable for Manifest {}

impl Manifest {
  /// Insert a build and return its hash. Identical definitions collapse.
  pub fn register(&mut self, def: BuildDef) -> Result<ObjectHash, HashError> {
    let hash = def.compute_hash()?;
    self.builds.entry(hash.clone()).or_insert(def);
    Ok(hash)
  }

  pub fn get(&self, hash: &ObjectHash) -> Option<&BuildDef> {
    self.builds.get(hash)
  }

  /// `roots` plus every build they transitively depend on.
  pub fn closure<'a>(&self, roots: impl IntoIterator<Item = &'a ObjectHash>) -> BTreeSet<ObjectHash> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<ObjectHash> = roots.into_iter().cloned().collect();
    while let Some(hash) = stack.pop() {
      if !seen.insert(hash.clone()) {
        continue;
      }
      if let Some(def) = self.builds.get(&hash) {
        stack.extend(def.deps.iter().cloned());
      }
    }
    seen
  }

  /// A manifest holding only the closure of `roots`.
  pub fn subset<'a>(&self, roots: impl IntoIterator<Item = &'a ObjectHash>) -> Manifest {
    let builds = self
      .closure(roots)
      .into_iter()
      .filter_map(|h| self.builds.get(&h).map(|d| (h, d.clone())))
      .collect();
    Manifest { builds }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::{BuildAction, BuildKind};

  fn def(name: &str, deps: &[&ObjectHash]) -> BuildDef {
    let mut def = BuildDef::new(name, BuildKind::Generic, "x86_64-linux".parse().unwrap());
    def.deps = deps.iter().map(|h| (*h).clone()).collect();
    def.actions.push(BuildAction::Cmd {
      cmd: format!("echo {}", name),
      env: BTreeMap::new(),
      cwd: None,
    });
    def
  }

  #[test]
  fn identical_definitions_deduplicate() {
    let mut manifest = Manifest::default();
    let a = manifest.register(def("engine", &[])).unwrap();
    let b = manifest.register(def("engine", &[])).unwrap();
    assert_eq!(a, b);
    assert_eq!(manifest.builds.len(), 1);
  }

  #[test]
  fn closure_follows_dependencies() {
    let mut manifest = Manifest::default();
    let deps = manifest.register(def("engine-deps", &[])).unwrap();
    let pkg = manifest.register(def("engine", &[&deps])).unwrap();
    let unrelated = manifest.register(def("other", &[])).unwrap();

    let closure = manifest.closure([&pkg]);
    assert!(closure.contains(&deps));
    assert!(closure.contains(&pkg));
    assert!(!closure.contains(&unrelated));

    assert_eq!(manifest.subset([&pkg]).builds.len(), 2);
  }
}
