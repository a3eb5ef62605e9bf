//! Package index lookups.
//!
//! Builds and dev shells name native tools and libraries (`"cc"`, `"jdk"`,
//! `"libiconv"`). A [`PackageIndex`] turns such a name into the directories a
//! process needs on its search paths. Two sources exist:
//!
//! - [`DirIndex`]: a pinned input laid out as `<root>/<system>/<name>/{bin,lib,include}`
//! - [`HostIndex`]: whatever the host provides on `PATH` and in the usual library roots
//!
//! [`IndexChain`] consults them in order; the pinned index wins.

use std::ffi::OsString;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::trace;

use crate::platform::System;
use crate::platform::os::Os;
use crate::util::fs::which_in;

/// Search-path contributions of one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedPackage {
  pub name: String,
  /// Where the package was found, for diagnostics.
  pub origin: String,
  pub bin_dirs: Vec<PathBuf>,
  pub lib_dirs: Vec<PathBuf>,
  pub include_dirs: Vec<PathBuf>,
  pub pkgconfig_dirs: Vec<PathBuf>,
}

pub trait PackageIndex: Debug + Send + Sync {
  fn lookup(&self, name: &str, system: &System) -> Option<ResolvedPackage>;

  /// Whether answers come from a pinned snapshot rather than the host.
  fn is_pinned(&self) -> bool {
    false
  }

  /// Like [`lookup`](Self::lookup), restricted to pinned snapshots.
  fn lookup_pinned(&self, name: &str, system: &System) -> Option<ResolvedPackage> {
    if self.is_pinned() { self.lookup(name, system) } else { None }
  }
}

/// A directory tree of prebuilt packages, one subtree per system.
#[derive(Debug, Clone)]
pub struct DirIndex {
  root: PathBuf,
}

impl DirIndex {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

impl PackageIndex for DirIndex {
  fn lookup(&self, name: &str, system: &System) -> Option<ResolvedPackage> {
    let base = self.root.join(system.triple()).join(name);
    if !base.is_dir() {
      trace!(name, path = %base.display(), "not in package index");
      return None;
    }

    let existing = |p: PathBuf| if p.is_dir() { vec![p] } else { Vec::new() };
    Some(ResolvedPackage {
      name: name.to_string(),
      origin: base.display().to_string(),
      bin_dirs: existing(base.join("bin")),
      lib_dirs: existing(base.join("lib")),
      include_dirs: existing(base.join("include")),
      pkgconfig_dirs: existing(base.join("lib").join("pkgconfig")),
    })
  }

  fn is_pinned(&self) -> bool {
    true
  }
}

/// Tools and libraries already installed on the host.
///
/// Only answers for the host system; a darwin library cannot come from a
/// linux host.
#[derive(Debug, Clone)]
pub struct HostIndex {
  search_path: OsString,
  lib_roots: Vec<PathBuf>,
}

impl HostIndex {
  pub fn from_env() -> Self {
    Self::new(std::env::var_os("PATH").unwrap_or_default(), default_lib_roots())
  }

  pub fn new(search_path: OsString, lib_roots: Vec<PathBuf>) -> Self {
    Self { search_path, lib_roots }
  }

  fn lookup_library(&self, name: &str, system: &System) -> Option<ResolvedPackage> {
    let stem = name.strip_prefix("lib").unwrap_or(name);
    let extensions: &[&str] = match system.os {
      Os::MacOs => &["dylib", "tbd", "a"],
      Os::Linux => &["so", "a"],
      Os::Windows => &["lib", "dll"],
    };

    for root in &self.lib_roots {
      for ext in extensions {
        let candidate = root.join(format!("lib{}.{}", stem, ext));
        if candidate.exists() {
          let include = root.parent().map(|p| p.join("include")).filter(|p| p.is_dir());
          return Some(ResolvedPackage {
            name: name.to_string(),
            origin: candidate.display().to_string(),
            lib_dirs: vec![root.clone()],
            include_dirs: include.into_iter().collect(),
            pkgconfig_dirs: Some(root.join("pkgconfig")).filter(|p| p.is_dir()).into_iter().collect(),
            ..Default::default()
          });
        }
      }
    }
    None
  }
}

/// Executable that proves a package is installed, when it differs from the name.
fn marker_binary(name: &str) -> &str {
  match name {
    "jdk" => "javac",
    "maven" => "mvn",
    "python" => "python3",
    other => other,
  }
}

impl PackageIndex for HostIndex {
  fn lookup(&self, name: &str, system: &System) -> Option<ResolvedPackage> {
    if !system.is_host() {
      return None;
    }

    if let Some(bin) = which_in(marker_binary(name), &self.search_path)
      && let Some(dir) = bin.parent()
    {
      return Some(ResolvedPackage {
        name: name.to_string(),
        origin: bin.display().to_string(),
        bin_dirs: vec![dir.to_path_buf()],
        ..Default::default()
      });
    }

    self.lookup_library(name, system)
  }
}

fn default_lib_roots() -> Vec<PathBuf> {
  let mut roots: Vec<PathBuf> = [
    "/usr/local/lib",
    "/usr/lib",
    "/opt/homebrew/lib",
    "/usr/lib/x86_64-linux-gnu",
    "/usr/lib/aarch64-linux-gnu",
    "/Library/Developer/CommandLineTools/SDKs/MacOSX.sdk/usr/lib",
  ]
  .iter()
  .map(PathBuf::from)
  .collect();
  if let Some(sdk) = std::env::var_os("SDKROOT") {
    roots.push(Path::new(&sdk).join("usr").join("lib"));
  }
  roots.retain(|r| r.is_dir());
  roots
}

/// Indexes consulted in order.
#[derive(Debug, Default)]
pub struct IndexChain {
  indexes: Vec<Box<dyn PackageIndex>>,
}

impl IndexChain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, index: impl PackageIndex + 'static) -> Self {
    self.indexes.push(Box::new(index));
    self
  }

  /// A pinned index directory (if any) backed by the host.
  pub fn standard(pinned: Option<&Path>) -> Self {
    let mut chain = Self::new();
    if let Some(root) = pinned {
      chain = chain.with(DirIndex::new(root));
    }
    chain.with(HostIndex::from_env())
  }
}

impl PackageIndex for IndexChain {
  fn lookup(&self, name: &str, system: &System) -> Option<ResolvedPackage> {
    self.indexes.iter().find_map(|i| i.lookup(name, system))
  }

  fn is_pinned(&self) -> bool {
    self.indexes.iter().any(|i| i.is_pinned())
  }

  fn lookup_pinned(&self, name: &str, system: &System) -> Option<ResolvedPackage> {
    self.indexes.iter().find_map(|i| i.lookup_pinned(name, system))
  }
}
