//! Rust toolchain pinning.
//!
//! A flake pins its compiler with a `rust-toolchain.toml` file:
//!
//! ```toml
//! [toolchain]
//! channel = "1.78.0"
//! components = ["rust-src", "rust-analyzer"]
//! targets = ["wasm32-unknown-unknown"]
//! profile = "minimal"
//! ```
//!
//! The legacy single-line `rust-toolchain` file (`nightly-2024-05-01`) is also
//! accepted. At realize time a [`ToolchainSpec`] is resolved against the
//! flake's pinned package index. Without a pinned index it is matched against
//! an installed rustup toolchain, or a host `rustc` of the same version.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::pkgs::PackageIndex;
use crate::platform::System;
use crate::platform::paths::home_dir;
use crate::util::fs::which_in;

/// Component list of an installed toolchain, relative to its root.
const COMPONENTS_FILE: &str = "lib/rustlib/components";

#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("toolchain file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read toolchain file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed toolchain file {path}: {message}")]
  Malformed { path: PathBuf, message: String },

  #[error("invalid toolchain channel '{0}'")]
  InvalidChannel(String),

  #[error("toolchain '{channel}' for {system} is not installed (searched {searched})")]
  Unavailable {
    channel: String,
    system: String,
    searched: String,
  },

  #[error("toolchain '{channel}' is missing component '{component}'")]
  MissingComponent { channel: String, component: String },
}

/// A pinned toolchain. Part of every build hash that compiles Rust.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolchainSpec {
  pub channel: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub components: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub targets: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub profile: Option<String>,
}

#[derive(Deserialize)]
struct ToolchainFile {
  toolchain: ToolchainSpec,
}

impl ToolchainSpec {
  pub fn from_file(path: &Path) -> Result<Self, ToolchainError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(ToolchainError::NotFound(path.to_path_buf()));
      }
      Err(source) => {
        return Err(ToolchainError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };
    Self::parse(&content, path)
  }

  /// Parse either TOML or legacy single-line content. `path` is only used in errors.
  pub fn parse(content: &str, path: &Path) -> Result<Self, ToolchainError> {
    let trimmed = content.trim();
    let spec = if is_legacy(trimmed) {
      ToolchainSpec {
        channel: trimmed.to_string(),
        components: Vec::new(),
        targets: Vec::new(),
        profile: None,
      }
    } else {
      toml::from_str::<ToolchainFile>(content)
        .map_err(|e| ToolchainError::Malformed {
          path: path.to_path_buf(),
          message: e.message().to_string(),
        })?
        .toolchain
    };

    validate_channel(&spec.channel)?;
    Ok(spec)
  }

  /// The rustup toolchain directory name for `system`.
  pub fn rustup_name(&self, system: &System) -> String {
    format!("{}-{}", self.channel, system.rust_target())
  }

  /// Locate the `bin` directory that provides this toolchain on `system`.
  ///
  /// A pinned package index must provide it as `rust-<channel>` or `rust`.
  /// Without one, `$RUSTUP_HOME/toolchains/<channel>-<target>` is tried
  /// first, then a `rustc` found on `search_path` whose version satisfies
  /// the channel.
  pub fn locate(
    &self,
    system: &System,
    index: &dyn PackageIndex,
    search_path: &std::ffi::OsStr,
  ) -> Result<PathBuf, ToolchainError> {
    if index.is_pinned() {
      return self.locate_pinned(system, index);
    }

    let rustup_home = rustup_home();
    let toolchain_dir = rustup_home.join("toolchains").join(self.rustup_name(system));
    let bin = toolchain_dir.join("bin");

    if bin.join(exe("cargo")).exists() {
      self.check_components(&toolchain_dir)?;
      debug!(channel = %self.channel, path = %bin.display(), "using rustup toolchain");
      return Ok(bin);
    }

    if system.is_host()
      && let Some(rustc) = which_in("rustc", search_path)
      && let Some(version) = rustc_version(&rustc)
      && self.accepts(&version)
      && let Some(dir) = rustc.parent()
    {
      if !self.components.is_empty() {
        warn!(channel = %self.channel, "host toolchain in use, components not verified");
      }
      debug!(channel = %self.channel, version = %version, path = %dir.display(), "using host toolchain");
      return Ok(dir.to_path_buf());
    }

    Err(ToolchainError::Unavailable {
      channel: self.channel.clone(),
      system: system.triple(),
      searched: toolchain_dir.display().to_string(),
    })
  }

  /// Package index names this toolchain may be published under, most specific first.
  pub fn index_names(&self) -> [String; 2] {
    [format!("rust-{}", self.channel), "rust".to_string()]
  }

  fn locate_pinned(&self, system: &System, index: &dyn PackageIndex) -> Result<PathBuf, ToolchainError> {
    let names = self.index_names();
    for name in &names {
      let Some(pkg) = index.lookup_pinned(name, system) else {
        continue;
      };
      let Some(bin) = pkg.bin_dirs.iter().find(|d| d.join(exe("cargo")).is_file()) else {
        warn!(name = %name, origin = %pkg.origin, "index package has no cargo");
        continue;
      };
      let root = bin.parent().unwrap_or(bin.as_path());
      if root.join(COMPONENTS_FILE).is_file() {
        self.check_components(root)?;
      } else if !self.components.is_empty() {
        warn!(channel = %self.channel, origin = %pkg.origin, "index toolchain lists no components, not verified");
      }
      debug!(channel = %self.channel, path = %bin.display(), "using pinned toolchain");
      return Ok(bin.clone());
    }

    Err(ToolchainError::Unavailable {
      channel: self.channel.clone(),
      system: system.triple(),
      searched: format!("pinned package index for {}", names.join(", ")),
    })
  }

  /// Whether a `rustc --version` line satisfies this channel.
  pub fn accepts(&self, version_line: &str) -> bool {
    let Some(version) = version_line.split_whitespace().nth(1) else {
      return false;
    };
    let (release, pre) = match version.split_once('-') {
      Some((r, p)) => (r, Some(p)),
      None => (version, None),
    };

    match self.channel.as_str() {
      "stable" => pre.is_none(),
      "beta" => pre.is_some_and(|p| p.starts_with("beta")),
      c if c.starts_with("nightly") => pre == Some("nightly"),
      c => {
        pre.is_none() && (release == c || release.starts_with(&format!("{}.", c)))
      }
    }
  }

  fn check_components(&self, toolchain_dir: &Path) -> Result<(), ToolchainError> {
    if self.components.is_empty() {
      return Ok(());
    }
    let manifest = toolchain_dir.join(COMPONENTS_FILE);
    let installed = fs::read_to_string(&manifest).unwrap_or_default();
    for component in &self.components {
      let present = installed
        .lines()
        .any(|line| line == component || line.starts_with(&format!("{}-", component)));
      if !present {
        return Err(ToolchainError::MissingComponent {
          channel: self.channel.clone(),
          component: component.clone(),
        });
      }
    }
    Ok(())
  }
}

pub fn rustup_home() -> PathBuf {
  std::env::var_os("RUSTUP_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| home_dir().join(".rustup"))
}

fn rustc_version(rustc: &Path) -> Option<String> {
  let output = Command::new(rustc).arg("--version").output().ok()?;
  if !output.status.success() {
    return None;
  }
  Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(windows)]
fn exe(name: &str) -> String {
  format!("{}.exe", name)
}

#[cfg(not(windows))]
fn exe(name: &str) -> String {
  name.to_string()
}

fn is_legacy(content: &str) -> bool {
  !content.is_empty() && !content.contains('\n') && !content.contains('[') && !content.contains('=')
}

fn validate_channel(channel: &str) -> Result<(), ToolchainError> {
  let invalid = || ToolchainError::InvalidChannel(channel.to_string());
  let (base, date) = match channel.split_once('-') {
    Some((base, date)) => (base, Some(date)),
    None => (channel, None),
  };

  match base {
    "stable" | "beta" | "nightly" => {}
    numeric => {
      let parts: Vec<&str> = numeric.split('.').collect();
      let all_numbers = parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
      if !(2..=3).contains(&parts.len()) || !all_numbers || date.is_some() {
        return Err(invalid());
      }
    }
  }

  if let Some(date) = date {
    let parts: Vec<&str> = date.split('-').collect();
    let lens_ok = parts.len() == 3 && parts[0].len() == 4 && parts[1].len() == 2 && parts[2].len() == 2;
    if !lens_ok || !parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())) {
      return Err(invalid());
    }
  }
  Ok(())
}
