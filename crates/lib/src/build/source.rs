//! Cargo source trees.
//!
//! A [`SourceTree`] fingerprints a project twice: once over everything a
//! package build reads, and once over the dependency manifests alone
//! (`Cargo.toml`, `Cargo.lock`). The second hash keys the dependency
//! pre-build, so editing code never invalidates compiled dependencies.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::consts::SOURCE_EXCLUSIONS;
use crate::util::hash::{ContentHash, DirHashError, hash_directory, hash_files};

const MANIFEST_FILES: &[&str] = &["Cargo.toml", "Cargo.lock"];

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("source directory not found: {0}")]
  NotFound(PathBuf),

  #[error("no Cargo.toml in {0}")]
  NoManifest(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid manifest {path}: {message}")]
  InvalidManifest { path: PathBuf, message: String },

  #[error(transparent)]
  Hash(#[from] DirHashError),
}

/// A fingerprinted cargo project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceTree {
  #[serde(skip)]
  pub root: PathBuf,
  /// Hash of the whole tree minus [`SOURCE_EXCLUSIONS`].
  pub hash: ContentHash,
  /// Hash of every `Cargo.toml` and `Cargo.lock` in the tree.
  pub deps_hash: ContentHash,
  pub name: Option<String>,
  pub version: Option<String>,
  /// Binaries the project produces, across all workspace members.
  pub bins: Vec<String>,
}

impl SourceTree {
  pub fn scan(root: &Path) -> Result<Self, SourceError> {
    if !root.is_dir() {
      return Err(SourceError::NotFound(root.to_path_buf()));
    }
    let root_manifest = root.join("Cargo.toml");
    if !root_manifest.is_file() {
      return Err(SourceError::NoManifest(root.to_path_buf()));
    }

    let manifests = dependency_manifests(root);
    let refs: Vec<&Path> = manifests.iter().map(PathBuf::as_path).collect();
    let deps_hash = hash_files(root, &refs)?;
    let hash = hash_directory(root, SOURCE_EXCLUSIONS)?;

    let top = read_manifest(&root_manifest)?;
    let package = top.get("package");
    let name = package.and_then(|p| p.get("name")).and_then(|v| v.as_str()).map(String::from);
    let version = package
      .and_then(|p| p.get("version"))
      .and_then(|v| v.as_str())
      .or_else(|| {
        top
          .get("workspace")
          .and_then(|w| w.get("package"))
          .and_then(|p| p.get("version"))
          .and_then(|v| v.as_str())
      })
      .map(String::from);

    let mut bins = Vec::new();
    for manifest in manifests.iter().filter(|p| p.ends_with("Cargo.toml")) {
      for target in cargo_targets(manifest)? {
        if target.kind == TargetKind::Bin && !bins.contains(&target.name) {
          bins.push(target.name);
        }
      }
    }
    bins.sort();

    debug!(root = %root.display(), hash = %hash, deps_hash = %deps_hash, "scanned source tree");
    Ok(Self {
      root: root.to_path_buf(),
      hash,
      deps_hash,
      name,
      version,
      bins,
    })
  }
}

/// Every `Cargo.toml` and `Cargo.lock` under `root`, sorted.
pub fn dependency_manifests(root: &Path) -> Vec<PathBuf> {
  let mut found: Vec<PathBuf> = WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || !e.file_name().to_str().is_some_and(|n| SOURCE_EXCLUSIONS.contains(&n)))
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter(|e| e.file_name().to_str().is_some_and(|n| MANIFEST_FILES.contains(&n)))
    .map(|e| e.into_path())
    .collect();
  found.sort();
  found
}

/// Copy only the dependency manifests of `from` into `to` and give every
/// package stub targets, so cargo can compile the dependency graph without
/// the real sources.
pub fn copy_manifests_with_stubs(from: &Path, to: &Path) -> Result<usize, SourceError> {
  let write = |path: &Path, content: &str| -> Result<(), SourceError> {
    let io_err = |source| SourceError::Read {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, content).map_err(io_err)
  };

  let mut stubs = 0;
  for manifest in dependency_manifests(from) {
    let rel = manifest.strip_prefix(from).unwrap_or(&manifest);
    let dest = to.join(rel);
    let content = fs::read_to_string(&manifest).map_err(|source| SourceError::Read {
      path: manifest.clone(),
      source,
    })?;
    write(&dest, &content)?;

    if !manifest.ends_with("Cargo.toml") {
      continue;
    }
    let Some(dest_dir) = dest.parent() else {
      continue;
    };
    for target in cargo_targets(&manifest)? {
      let body = match target.kind {
        TargetKind::Lib => "",
        _ => "fn main() {}\n",
      };
      write(&dest_dir.join(&target.path), body)?;
      stubs += 1;
    }
  }
  Ok(stubs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
  Lib,
  Bin,
  Build,
  Other,
}

#[derive(Debug)]
struct CargoTarget {
  kind: TargetKind,
  name: String,
  /// Relative to the manifest's directory.
  path: PathBuf,
}

fn read_manifest(path: &Path) -> Result<toml::Table, SourceError> {
  let content = fs::read_to_string(path).map_err(|source| SourceError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  content.parse::<toml::Table>().map_err(|e| SourceError::InvalidManifest {
    path: path.to_path_buf(),
    message: e.to_string(),
  })
}

/// Targets of a package manifest, following cargo's auto-discovery for the
/// conventional `src/main.rs`, `src/lib.rs`, `src/bin/*.rs` and `build.rs`.
/// Virtual workspace manifests have none.
fn cargo_targets(manifest: &Path) -> Result<Vec<CargoTarget>, SourceError> {
  let table = read_manifest(manifest)?;
  let Some(package) = table.get("package").and_then(|p| p.as_table()) else {
    return Ok(Vec::new());
  };
  let dir = manifest.parent().unwrap_or(Path::new("."));
  let pkg_name = package.get("name").and_then(|v| v.as_str()).unwrap_or("main").to_string();
  let mut targets = Vec::new();

  let lib = table.get("lib").and_then(|v| v.as_table());
  let lib_path = lib
    .and_then(|l| l.get("path"))
    .and_then(|v| v.as_str())
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("src/lib.rs"));
  if lib.is_some() || dir.join(&lib_path).is_file() {
    targets.push(CargoTarget {
      kind: TargetKind::Lib,
      name: pkg_name.clone(),
      path: lib_path,
    });
  }

  if dir.join("src/main.rs").is_file() {
    targets.push(CargoTarget {
      kind: TargetKind::Bin,
      name: pkg_name.clone(),
      path: PathBuf::from("src/main.rs"),
    });
  }

  if let Ok(entries) = fs::read_dir(dir.join("src/bin")) {
    for entry in entries.flatten() {
      let path = entry.path();
      if path.extension().is_some_and(|e| e == "rs")
        && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
      {
        targets.push(CargoTarget {
          kind: TargetKind::Bin,
          name: stem.to_string(),
          path: PathBuf::from("src/bin").join(format!("{stem}.rs")),
        });
      }
    }
  }

  for (section, kind, default_dir) in [
    ("bin", TargetKind::Bin, "src/bin"),
    ("example", TargetKind::Other, "examples"),
    ("test", TargetKind::Other, "tests"),
    ("bench", TargetKind::Other, "benches"),
  ] {
    let entries = table.get(section).and_then(|v| v.as_array()).cloned().unwrap_or_default();
    for entry in entries {
      let Some(name) = entry.get("name").and_then(|v| v.as_str()) else {
        return Err(SourceError::InvalidManifest {
          path: manifest.to_path_buf(),
          message: format!("[[{section}]] entry without a name"),
        });
      };
      let path = entry
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default_dir).join(format!("{name}.rs")));
      targets.retain(|t| !(t.kind == kind && t.name == name));
      targets.push(CargoTarget {
        kind,
        name: name.to_string(),
        path,
      });
    }
  }

  match package.get("build") {
    Some(toml::Value::String(path)) => targets.push(CargoTarget {
      kind: TargetKind::Build,
      name: "build-script".to_string(),
      path: PathBuf::from(path),
    }),
    Some(toml::Value::Boolean(false)) => {}
    _ if dir.join("build.rs").is_file() => targets.push(CargoTarget {
      kind: TargetKind::Build,
      name: "build-script".to_string(),
      path: PathBuf::from("build.rs"),
    }),
    _ => {}
  }

  if targets.is_empty() {
    targets.push(CargoTarget {
      kind: TargetKind::Lib,
      name: pkg_name,
      path: PathBuf::from("src/lib.rs"),
    });
  }

  Ok(targets)
}
