use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::platform::System;
use crate::toolchain::ToolchainSpec;
use crate::util::hash::{HashError, Hashable, ObjectHash};

/// What a build produces. Drives how its outputs are presented, not how it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildKind {
  /// Compiled third-party dependencies of a cargo project (`target/`).
  CargoDeps,
  /// Installed binaries of a cargo project (`bin/`).
  CargoPackage,
  /// A virtual environment with exactly `libraries` installed.
  InterpreterEnv {
    interpreter: String,
    libraries: Vec<String>,
  },
  /// An arbitrary command, typically used as a check.
  Generic,
}

impl BuildKind {
  pub fn label(&self) -> &'static str {
    match self {
      BuildKind::CargoDeps => "cargo-deps",
      BuildKind::CargoPackage => "cargo-package",
      BuildKind::InterpreterEnv { .. } => "interpreter-env",
      BuildKind::Generic => "generic",
    }
  }
}

/// Something that contributes executables to a build's `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRef {
  Toolchain(ToolchainSpec),
  /// Looked up in the package index at realize time.
  Package(String),
  /// `bin/` of another build.
  Build(ObjectHash),
}

/// Which part of a source tree a [`BuildAction::CopySource`] copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFilter {
  /// Everything except VCS metadata and build outputs.
  Full,
  /// Only `Cargo.toml`/`Cargo.lock` files, with stub targets generated so
  /// cargo can compile the dependency graph.
  DepsOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BuildAction {
  /// Copy a source tree. `content_hash` pins what is copied; the path does not.
  CopySource {
    src: String,
    content_hash: String,
    filter: SourceFilter,
    to: String,
  },
  /// Copy a directory (usually another build's output) into this build.
  CopyTree { from: String, to: String },
  /// Run a shell command in the isolated build environment.
  Cmd {
    cmd: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
  },
  /// Copy the named executables from `from` into `to`.
  InstallBins {
    from: String,
    to: String,
    names: Vec<String>,
  },
}

/// A content-addressed build.
///
/// String fields of actions and outputs may contain placeholders
/// (`$${out}`, `$${build:<hash>:<output>}`) resolved at realize time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDef {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  pub kind: BuildKind,
  pub system: System,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tools: Vec<ToolRef>,
  /// Native libraries from the package index added to link and include paths.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub link_inputs: Vec<String>,
  /// When set, host library search paths are not inherited.
  #[serde(default)]
  pub strict_deps: bool,
  /// Revision of the package index the tools and link inputs come from.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub index_rev: Option<String>,
  /// Builds that must be realized first.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub deps: Vec<ObjectHash>,
  pub actions: Vec<BuildAction>,
  /// Output name -> value. `out` is always present once realized.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub outputs: BTreeMap<String, String>,
  /// Executable under `bin/` that `flint run` launches.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub main_program: Option<String>,
}

impl BuildDef {
  pub fn new(name: &str, kind: BuildKind, system: System) -> Self {
    Self {
      name: name.to_string(),
      version: None,
      kind,
      system,
      tools: Vec::new(),
      link_inputs: Vec::new(),
      strict_deps: false,
      index_rev: None,
      deps: Vec::new(),
      actions: Vec::new(),
      outputs: BTreeMap::new(),
      main_program: None,
    }
  }

  pub fn toolchain(&self) -> Option<&ToolchainSpec> {
    self.tools.iter().find_map(|t| match t {
      ToolRef::Toolchain(spec) => Some(spec),
      _ => None,
    })
  }

  /// `name-version`, or just `name`.
  pub fn display_name(&self) -> String {
    match &self.version {
      Some(v) => format!("{}-{}", self.name, v),
      None => self.name.clone(),
    }
  }
}

impl Hashable for BuildDef {
  /// Source locations are not part of a build's identity, only their content.
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    #[derive(Serialize)]
    struct Identity<'a>(&'a BuildDef);
    impl Hashable for Identity<'_> {}

    let mut normalized = self.clone();
    for action in &mut normalized.actions {
      if let BuildAction::CopySource { src, .. } = action {
        src.clear();
      }
    }
    Identity(&normalized).compute_hash()
  }
}
