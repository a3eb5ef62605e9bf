use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the directory for data files (gc roots, the default store).
///
/// `FLINT_ROOT` overrides the platform default.
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Ok(root) = std::env::var("FLINT_ROOT") {
    return PathBuf::from(root);
  }
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
}

/// Returns the directory for data files (gc roots, the default store).
///
/// `FLINT_ROOT` overrides the platform default.
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Ok(root) = std::env::var("FLINT_ROOT") {
    return PathBuf::from(root);
  }
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Content-addressed store root. `FLINT_STORE` overrides `<data>/store`.
pub fn store_dir() -> PathBuf {
  if let Ok(path) = std::env::var("FLINT_STORE") {
    return PathBuf::from(path);
  }
  data_dir().join("store")
}

/// Directory holding gc root records.
pub fn roots_dir() -> PathBuf {
  data_dir().join("roots")
}

/// Directory holding git checkouts of flake inputs.
pub fn inputs_cache_dir() -> PathBuf {
  cache_dir().join("inputs")
}
