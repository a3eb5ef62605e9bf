//! Copy and install actions.
//!
//! Filesystem work is blocking, so each action runs on tokio's blocking pool.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::build::SourceFilter;
use crate::build::source::{SourceTree, copy_manifests_with_stubs};
use crate::consts::SOURCE_EXCLUSIONS;
use crate::execute::types::ExecuteError;
use crate::util::fs::{Mtimes, copy_tree, is_executable, make_executable};

async fn blocking<T, F>(f: F) -> Result<T, ExecuteError>
where
  F: FnOnce() -> Result<T, ExecuteError> + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| ExecuteError::Io(std::io::Error::other(e)))?
}

/// Copy a source tree after checking it still hashes to what was evaluated.
pub async fn copy_source(src: &str, content_hash: &str, filter: SourceFilter, to: &str) -> Result<(), ExecuteError> {
  let src = PathBuf::from(src);
  let to = PathBuf::from(to);
  let expected = content_hash.to_string();

  blocking(move || {
    let tree = SourceTree::scan(&src)?;
    let actual = match filter {
      SourceFilter::Full => tree.hash,
      SourceFilter::DepsOnly => tree.deps_hash,
    };
    if actual.0 != expected {
      return Err(ExecuteError::SourceChanged {
        path: src.display().to_string(),
        expected,
        actual: actual.0,
      });
    }

    match filter {
      SourceFilter::Full => {
        let count = copy_tree(&src, &to, SOURCE_EXCLUSIONS, Mtimes::Fresh).map_err(|source| ExecuteError::Copy {
          from: src.display().to_string(),
          to: to.display().to_string(),
          source,
        })?;
        info!(files = count, src = %src.display(), "copied source");
      }
      SourceFilter::DepsOnly => {
        let stubs = copy_manifests_with_stubs(&src, &to)?;
        info!(stubs, src = %src.display(), "copied dependency manifests");
      }
    }
    Ok(())
  })
  .await
}

/// Copy a build output, keeping its mtimes.
pub async fn copy_dir(from: &str, to: &str) -> Result<(), ExecuteError> {
  let from = PathBuf::from(from);
  let to = PathBuf::from(to);
  blocking(move || {
    let count = copy_tree(&from, &to, &[], Mtimes::Preserve).map_err(|source| ExecuteError::Copy {
      from: from.display().to_string(),
      to: to.display().to_string(),
      source,
    })?;
    debug!(files = count, from = %from.display(), "copied tree");
    Ok(())
  })
  .await
}

/// Copy the named executables from `from` into `to`. With no names, every
/// executable file directly inside `from` is installed.
pub async fn install_bins(from: &str, to: &str, names: &[String]) -> Result<Vec<String>, ExecuteError> {
  let from = PathBuf::from(from);
  let to = PathBuf::from(to);
  let names = names.to_vec();

  blocking(move || {
    fs::create_dir_all(&to)?;
    let sources = if names.is_empty() {
      discover_executables(&from)?
    } else {
      names
        .iter()
        .map(|name| {
          candidates(&from, name)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ExecuteError::MissingBinary {
              name: name.clone(),
              dir: from.display().to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?
    };

    let mut installed = Vec::new();
    for src in sources {
      let Some(file_name) = src.file_name() else {
        continue;
      };
      let dest = to.join(file_name);
      fs::copy(&src, &dest).map_err(|source| ExecuteError::Copy {
        from: src.display().to_string(),
        to: dest.display().to_string(),
        source,
      })?;
      make_executable(&dest)?;
      installed.push(file_name.to_string_lossy().to_string());
    }
    info!(bins = ?installed, dir = %to.display(), "installed binaries");
    Ok(installed)
  })
  .await
}

fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
  if cfg!(windows) {
    vec![dir.join(format!("{name}.exe")), dir.join(name)]
  } else {
    vec![dir.join(name)]
  }
}

fn discover_executables(dir: &Path) -> Result<Vec<PathBuf>, ExecuteError> {
  let mut found = Vec::new();
  for entry in fs::read_dir(dir)? {
    let path = entry?.path();
    let is_artifact = path
      .extension()
      .is_some_and(|e| matches!(e.to_str(), Some("d" | "rlib" | "rmeta" | "so" | "dylib" | "dll" | "pdb")));
    if !is_artifact && is_executable(&path) {
      found.push(path);
    }
  }
  found.sort();
  Ok(found)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_directory;
  use tempfile::TempDir;

  fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::create_dir_all(dir.path().join("target/release")).unwrap();
    fs::write(
      dir.path().join("Cargo.toml"),
      "[package]\nname = \"engine\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();
    fs::write(dir.path().join("src/main.rs"), "fn main() { run(); }").unwrap();
    fs::write(dir.path().join("target/release/engine"), "stale").unwrap();
    dir
  }

  fn s(p: &Path) -> String {
    p.to_string_lossy().to_string()
  }

  mod source {
    use super::*;

    #[tokio::test]
    async fn full_copy_skips_build_outputs() {
      let src = project();
      let dest = TempDir::new().unwrap();
      let hash = hash_directory(src.path(), SOURCE_EXCLUSIONS).unwrap();

      copy_source(&s(src.path()), &hash.0, SourceFilter::Full, &s(dest.path())).await.unwrap();

      assert!(dest.path().join("src/main.rs").is_file());
      assert!(!dest.path().join("target").exists());
    }

    #[tokio::test]
    async fn deps_only_copy_stubs_sources() {
      let src = project();
      let dest = TempDir::new().unwrap();
      let tree = SourceTree::scan(src.path()).unwrap();

      copy_source(&s(src.path()), &tree.deps_hash.0, SourceFilter::DepsOnly, &s(dest.path()))
        .await
        .unwrap();

      assert_eq!(fs::read_to_string(dest.path().join("src/main.rs")).unwrap(), "fn main() {}\n");
    }

    #[tokio::test]
    async fn changed_source_is_rejected() {
      let src = project();
      let dest = TempDir::new().unwrap();
      let err = copy_source(&s(src.path()), "stale-hash", SourceFilter::Full, &s(dest.path()))
        .await
        .unwrap_err();
      assert!(matches!(err, ExecuteError::SourceChanged { .. }));
      assert!(!dest.path().join("src").exists());
    }
  }

  mod install {
    use super::*;

    #[tokio::test]
    #[cfg(unix)]
    async fn named_binaries_are_installed_executable() {
      let dir = TempDir::new().unwrap();
      let release = dir.path().join("release");
      fs::create_dir_all(&release).unwrap();
      fs::write(release.join("engine"), "elf").unwrap();
      let bin = dir.path().join("bin");

      let installed = install_bins(&s(&release), &s(&bin), &["engine".to_string()]).await.unwrap();

      assert_eq!(installed, vec!["engine"]);
      assert!(is_executable(&bin.join("engine")));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
      let dir = TempDir::new().unwrap();
      let err = install_bins(&s(dir.path()), &s(&dir.path().join("bin")), &["ghost".to_string()])
        .await
        .unwrap_err();
      assert!(matches!(err, ExecuteError::MissingBinary { name, .. } if name == "ghost"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn discovers_executables_without_names() {
      let dir = TempDir::new().unwrap();
      let release = dir.path().join("release");
      fs::create_dir_all(&release).unwrap();
      for name in ["engine", "engine.d", "libengine.rlib"] {
        fs::write(release.join(name), "x").unwrap();
        make_executable(&release.join(name)).unwrap();
      }
      fs::write(release.join("notes.txt"), "x").unwrap();

      let installed = install_bins(&s(&release), &s(&dir.path().join("bin")), &[]).await.unwrap();
      assert_eq!(installed, vec!["engine"]);
    }
  }

  #[tokio::test]
  async fn copy_dir_copies_everything() {
    let src = project();
    let dest = TempDir::new().unwrap();
    copy_dir(&s(&src.path().join("target")), &s(&dest.path().join("target"))).await.unwrap();
    assert!(dest.path().join("target/release/engine").is_file());
  }
}
