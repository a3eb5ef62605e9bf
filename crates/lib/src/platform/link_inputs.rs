//! Platform-conditional link inputs.
//!
//! A [`PlatformInputs`] maps an OS family (`"darwin"`) or a full system triple
//! (`"aarch64-darwin"`) to the extra native libraries a build needs there.
//! Triple entries are applied after OS entries; duplicates are dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::System;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInputs(BTreeMap<String, Vec<String>>);

impl Default for PlatformInputs {
  /// darwin links against libiconv; every other system needs nothing extra.
  fn default() -> Self {
    let mut map = BTreeMap::new();
    map.insert("darwin".to_string(), vec!["libiconv".to_string()]);
    Self(map)
  }
}

impl PlatformInputs {
  pub fn empty() -> Self {
    Self(BTreeMap::new())
  }

  pub fn from_map(map: BTreeMap<String, Vec<String>>) -> Self {
    Self(map)
  }

  /// Link inputs applicable to `system`.
  pub fn for_system(&self, system: &System) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for key in [system.os.as_str().to_string(), system.triple()] {
      if let Some(names) = self.0.get(&key) {
        for name in names {
          if !out.contains(name) {
            out.push(name.clone());
          }
        }
      }
    }
    out
  }

  pub fn keys(&self) -> impl Iterator<Item = &String> {
    self.0.keys()
  }
}
