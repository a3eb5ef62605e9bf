//! Entering a dev shell.
//!
//! A [`ShellEnv`] is computed from a [`DevShell`] once its builds are
//! realized. Unlike a build environment it extends the caller's environment
//! instead of replacing it: search paths are prepended to the host values.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::build::BuildKind;
use crate::execute::env::SearchPaths;
use crate::execute::types::BuildResult;
use crate::flake::{DevShell, ShellPackage};
use crate::manifest::Manifest;
use crate::pkgs::PackageIndex;
use crate::platform::System;
use crate::toolchain::ToolchainError;
use crate::util::hash::ObjectHash;

#[derive(Debug, Error)]
pub enum ShellError {
  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error("package '{name}' is not available for {system}")]
  PackageUnavailable { name: String, system: String },

  #[error("build {0} was not realized")]
  NotRealized(ObjectHash),

  #[error("no shell to run: set $SHELL or pass --command")]
  NoShell,
}

/// Variables a dev shell adds on top of the caller's environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellEnv {
  pub vars: BTreeMap<String, OsString>,
}

impl ShellEnv {
  /// Resolve the environment of `shell` on `system`.
  ///
  /// `realized` must contain every hash of [`DevShell::required_builds`].
  pub fn resolve(
    name: &str,
    shell: &DevShell,
    system: &System,
    manifest: &Manifest,
    realized: &HashMap<ObjectHash, BuildResult>,
    index: &dyn PackageIndex,
    search_path: &OsStr,
  ) -> Result<Self, ShellError> {
    let mut paths = SearchPaths::default();
    let mut vars = BTreeMap::new();

    if let Some(toolchain) = &shell.toolchain {
      paths.add_bin(toolchain.locate(system, index, search_path)?);
    }

    for pkg in &shell.packages {
      match pkg {
        ShellPackage::Index(pkg_name) => {
          let found = index
            .lookup(pkg_name, system)
            .ok_or_else(|| ShellError::PackageUnavailable {
              name: pkg_name.clone(),
              system: system.triple(),
            })?;
          debug!(name = %pkg_name, origin = %found.origin, "shell package");
          paths.add_tool(&found);
          paths.add_library(&found);
          if pkg_name == "jdk"
            && let Some(home) = found.bin_dirs.first().and_then(|b| b.parent())
          {
            vars.insert("JAVA_HOME".to_string(), home.as_os_str().to_os_string());
          }
        }
        ShellPackage::Build(hash) => {
          let result = realized.get(hash).ok_or_else(|| ShellError::NotRealized(hash.clone()))?;
          paths.add_bin(result.store_path.join("bin"));
          if let Some(def) = manifest.get(hash)
            && matches!(def.kind, BuildKind::InterpreterEnv { .. })
          {
            vars.insert("VIRTUAL_ENV".to_string(), result.store_path.clone().into_os_string());
            vars.insert("PYTHONDONTWRITEBYTECODE".to_string(), "1".into());
          }
        }
      }
    }

    vars.extend(paths.to_vars(true));
    if let Some(bins) = vars.remove("PATH") {
      vars.insert("PATH".to_string(), prepend(bins, std::env::var_os("PATH")));
    }
    vars.insert("FLINT_SHELL".to_string(), name.into());
    vars.insert("FLINT_SYSTEM".to_string(), system.triple().into());

    Ok(Self { vars })
  }

  /// `export` lines that reproduce this environment in a POSIX shell.
  pub fn to_exports(&self) -> String {
    self
      .vars
      .iter()
      .map(|(k, v)| format!("export {}={}\n", k, quote(&v.to_string_lossy())))
      .collect()
  }

  /// A process running `command` through the shell, or the interactive
  /// `$SHELL` when no command is given, with this environment applied.
  pub fn command(&self, command: Option<&str>, cwd: &Path) -> Result<Command, ShellError> {
    let mut cmd = match command {
      Some(c) => {
        let (shell, args) = script_shell();
        let mut cmd = Command::new(shell);
        cmd.args(args).arg(c);
        cmd
      }
      None => Command::new(interactive_shell().ok_or(ShellError::NoShell)?),
    };
    cmd.current_dir(cwd).envs(&self.vars);
    Ok(cmd)
  }
}

fn prepend(first: OsString, rest: Option<OsString>) -> OsString {
  let mut dirs: Vec<PathBuf> = std::env::split_paths(&first).collect();
  if let Some(rest) = rest {
    dirs.extend(std::env::split_paths(&rest));
  }
  std::env::join_paths(dirs).unwrap_or(first)
}

fn quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(unix)]
fn script_shell() -> (&'static str, &'static [&'static str]) {
  ("/bin/sh", &["-c"])
}

#[cfg(windows)]
fn script_shell() -> (&'static str, &'static [&'static str]) {
  ("powershell.exe", &["-NoProfile", "-NonInteractive", "-Command"])
}

fn interactive_shell() -> Option<PathBuf> {
  let var = if cfg!(windows) { "COMSPEC" } else { "SHELL" };
  std::env::var_os(var).filter(|s| !s.is_empty()).map(PathBuf::from)
}
