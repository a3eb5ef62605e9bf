//! Filesystem helpers shared by build actions and the dev shell.

use std::fs;
use std::io;
use std::path::Path;

use filetime::{FileTime, set_file_mtime};
use walkdir::WalkDir;

/// How [`copy_tree`] treats file modification times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mtimes {
  /// Copies are stamped with the current time.
  Fresh,
  /// Copies keep the source's mtime. Cargo compares mtimes inside `target/`,
  /// so a copied target directory must keep the ones it was built with.
  Preserve,
}

/// Recursively copy `from` into `to`, preserving symlinks and the executable bit.
///
/// Entries whose file name appears in `exclude` are skipped at any depth.
pub fn copy_tree(from: &Path, to: &Path, exclude: &[&str], mtimes: Mtimes) -> io::Result<u64> {
  let mut copied = 0;
  fs::create_dir_all(to)?;

  let walker = WalkDir::new(from)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || !e.file_name().to_str().is_some_and(|n| exclude.contains(&n)));

  for entry in walker {
    let entry = entry.map_err(io::Error::other)?;
    if entry.depth() == 0 {
      continue;
    }
    let rel = entry.path().strip_prefix(from).map_err(io::Error::other)?;
    let dest = to.join(rel);
    let kind = entry.file_type();

    if kind.is_symlink() {
      let target = fs::read_link(entry.path())?;
      if dest.symlink_metadata().is_ok() {
        fs::remove_file(&dest)?;
      }
      symlink(&target, &dest)?;
    } else if kind.is_dir() {
      fs::create_dir_all(&dest)?;
    } else if kind.is_file() {
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::copy(entry.path(), &dest)?;
      if mtimes == Mtimes::Preserve {
        let meta = entry.metadata().map_err(io::Error::other)?;
        set_file_mtime(&dest, FileTime::from_last_modification_time(&meta))?;
      }
      copied += 1;
    }
  }

  Ok(copied)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  if target.is_dir() {
    std::os::windows::fs::symlink_dir(target, link)
  } else {
    std::os::windows::fs::symlink_file(target, link)
  }
}

/// Whether `path` is a regular file the current user may execute.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;
  fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(windows)]
pub fn is_executable(path: &Path) -> bool {
  path.is_file()
}

/// Mark a file executable (no-op on Windows).
#[cfg(unix)]
pub fn make_executable(path: &Path) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  let mut perms = fs::metadata(path)?.permissions();
  perms.set_mode(perms.mode() | 0o755);
  fs::set_permissions(path, perms)
}

#[cfg(windows)]
pub fn make_executable(_path: &Path) -> io::Result<()> {
  Ok(())
}

/// First executable named `name` in the `PATH`-style list `search`.
pub fn which_in(name: &str, search: &std::ffi::OsStr) -> Option<std::path::PathBuf> {
  std::env::split_paths(search)
    .flat_map(|dir| executable_names(name).into_iter().map(move |n| dir.join(n)))
    .find(|candidate| is_executable(candidate))
}

/// First executable named `name` on the current `PATH`.
pub fn which(name: &str) -> Option<std::path::PathBuf> {
  which_in(name, &std::env::var_os("PATH")?)
}

#[cfg(windows)]
fn executable_names(name: &str) -> Vec<String> {
  vec![format!("{}.exe", name), format!("{}.cmd", name), name.to_string()]
}

#[cfg(not(windows))]
fn executable_names(name: &str) -> Vec<String> {
  vec![name.to_string()]
}

/// Size in bytes of everything under `path`. Unreadable entries count as zero.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}
