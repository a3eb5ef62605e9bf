//! Dev shell descriptors.

use serde::{Deserialize, Serialize};

use crate::toolchain::ToolchainSpec;
use crate::util::hash::ObjectHash;

/// One entry of a dev shell's package list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ShellPackage {
  /// A package-index name such as `"maven"` or `"jdk"`.
  Index(String),
  /// A build, typically an interpreter env.
  Build(ObjectHash),
}

/// An interactive environment: a toolchain plus extra packages.
///
/// `checks` are realized before the shell is entered, so entering it also
/// asserts the project still builds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevShell {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub toolchain: Option<ToolchainSpec>,
  pub packages: Vec<ShellPackage>,
  pub checks: Vec<ObjectHash>,
}

impl DevShell {
  /// Builds that must be realized before entering: checks, then package builds.
  pub fn required_builds(&self) -> Vec<ObjectHash> {
    let mut builds = self.checks.clone();
    for pkg in &self.packages {
      if let ShellPackage::Build(hash) = pkg
        && !builds.contains(hash)
      {
        builds.push(hash.clone());
      }
    }
    builds
  }

  pub fn index_packages(&self) -> impl Iterator<Item = &str> {
    self.packages.iter().filter_map(|p| match p {
      ShellPackage::Index(name) => Some(name.as_str()),
      ShellPackage::Build(_) => None,
    })
  }
}
