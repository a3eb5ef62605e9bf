//! The environment a build's commands run in.
//!
//! Commands never see the caller's environment. `PATH` holds only the
//! declared tools, and link inputs become compiler search paths. Host library
//! paths are appended unless the build asks for strict dependencies.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::PathBuf;

use tracing::debug;

use crate::build::{BuildDef, ToolRef};
use crate::pkgs::ResolvedPackage;
use crate::platform::paths::home_dir;
use crate::toolchain::rustup_home;
use crate::util::hash::ObjectHash;

use super::types::{BuildResult, ExecuteConfig, ExecuteError};

/// Host variables a build may still read: CA certificates and cargo network settings.
const PASSTHROUGH: &[&str] = &["SSL_CERT_FILE", "SSL_CERT_DIR", "CARGO_NET_OFFLINE", "CARGO_REGISTRIES_CRATES_IO_PROTOCOL"];

/// Ordered search-path lists, deduplicated on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPaths {
  pub bin: Vec<PathBuf>,
  pub lib: Vec<PathBuf>,
  pub include: Vec<PathBuf>,
  pub pkgconfig: Vec<PathBuf>,
}

impl SearchPaths {
  pub fn add_bin(&mut self, dir: PathBuf) {
    push_unique(&mut self.bin, dir);
  }

  pub fn add_tool(&mut self, pkg: &ResolvedPackage) {
    for dir in &pkg.bin_dirs {
      self.add_bin(dir.clone());
    }
  }

  pub fn add_library(&mut self, pkg: &ResolvedPackage) {
    for dir in &pkg.lib_dirs {
      push_unique(&mut self.lib, dir.clone());
    }
    for dir in &pkg.include_dirs {
      push_unique(&mut self.include, dir.clone());
    }
    for dir in &pkg.pkgconfig_dirs {
      push_unique(&mut self.pkgconfig, dir.clone());
    }
  }

  /// `PATH` plus the compiler search variables. With `inherit`, host values
  /// of the search variables are appended.
  pub fn to_vars(&self, inherit: bool) -> BTreeMap<String, OsString> {
    let mut vars = BTreeMap::new();
    if let Some(path) = join(&self.bin, None) {
      vars.insert("PATH".to_string(), path);
    }
    for (name, dirs) in [
      ("LIBRARY_PATH", &self.lib),
      ("CPATH", &self.include),
      ("PKG_CONFIG_PATH", &self.pkgconfig),
    ] {
      let host = if inherit { std::env::var_os(name) } else { None };
      if let Some(value) = join(dirs, host) {
        vars.insert(name.to_string(), value);
      }
    }
    vars
  }
}

fn push_unique(list: &mut Vec<PathBuf>, dir: PathBuf) {
  if !list.contains(&dir) {
    list.push(dir);
  }
}

fn join(dirs: &[PathBuf], host: Option<OsString>) -> Option<OsString> {
  let mut all: Vec<PathBuf> = dirs.to_vec();
  if let Some(host) = host {
    all.extend(std::env::split_paths(&host));
  }
  if all.is_empty() {
    return None;
  }
  std::env::join_paths(all).ok()
}

/// Resolved variables for one build.
#[derive(Debug, Clone, Default)]
pub struct BuildEnv {
  pub vars: BTreeMap<String, OsString>,
}

impl BuildEnv {
  pub fn resolve(
    def: &BuildDef,
    completed: &HashMap<ObjectHash, BuildResult>,
    config: &ExecuteConfig,
  ) -> Result<Self, ExecuteError> {
    let system = &def.system;
    let mut paths = SearchPaths::default();
    let mut uses_cargo = false;

    let lookup = |name: &str| {
      config
        .index
        .lookup(name, system)
        .ok_or_else(|| ExecuteError::PackageUnavailable {
          name: name.to_string(),
          system: system.triple(),
        })
    };

    for tool in &def.tools {
      match tool {
        ToolRef::Toolchain(spec) => {
          paths.add_bin(spec.locate(system, config.index.as_ref(), &config.search_path)?);
          uses_cargo = true;
        }
        ToolRef::Package(name) => paths.add_tool(&lookup(name)?),
        ToolRef::Build(hash) => {
          let dep = completed
            .get(hash)
            .ok_or_else(|| ExecuteError::DependencyFailed(hash.clone()))?;
          paths.add_bin(dep.store_path.join("bin"));
        }
      }
    }

    for name in &def.link_inputs {
      let pkg = lookup(name)?;
      debug!(name = %name, origin = %pkg.origin, "link input");
      paths.add_library(&pkg);
    }

    let mut vars = paths.to_vars(!def.strict_deps);
    vars.insert("FLINT_SYSTEM".to_string(), system.triple().into());

    if uses_cargo {
      let cargo_home = std::env::var_os("CARGO_HOME").unwrap_or_else(|| home_dir().join(".cargo").into_os_string());
      vars.insert("CARGO_HOME".to_string(), cargo_home);
      vars.insert("RUSTUP_HOME".to_string(), rustup_home().into_os_string());
    }
    for name in PASSTHROUGH {
      if let Some(value) = std::env::var_os(name) {
        vars.insert(name.to_string(), value);
      }
    }

    Ok(Self { vars })
  }
}
