//! Per-system outputs and references into them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::shell::DevShell;
use crate::manifest::Manifest;
use crate::platform::System;
use crate::util::hash::ObjectHash;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutputError {
  #[error("{output} references build {hash}, which was never registered")]
  UnknownBuild { output: String, hash: ObjectHash },

  #[error("{output} is built for {actual} but exported for {expected}")]
  WrongSystem {
    output: String,
    expected: String,
    actual: String,
  },

  #[error("app {output} has no program")]
  EmptyProgram { output: String },

  #[error("flake has no output {output} for {system}")]
  Missing { output: String, system: String },

  #[error("flake was not evaluated for {0}")]
  NoSuchSystem(String),

  #[error("invalid output reference '{0}': expected [packages|apps|checks|devShells.]<name>")]
  InvalidRef(String),
}

/// A runnable entry: a program inside a package's store entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
  /// Always `"app"`.
  #[serde(rename = "type")]
  pub kind: String,
  pub package: ObjectHash,
  /// Path of the executable relative to the package's store entry.
  pub program: String,
}

impl App {
  pub fn new(package: ObjectHash, program: impl Into<String>) -> Self {
    Self {
      kind: "app".to_string(),
      package,
      program: program.into(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemOutputs {
  pub packages: BTreeMap<String, ObjectHash>,
  pub apps: BTreeMap<String, App>,
  pub checks: BTreeMap<String, ObjectHash>,
  #[serde(rename = "devShells")]
  pub dev_shells: BTreeMap<String, DevShell>,
}

impl SystemOutputs {
  /// Every build hash must name a registered build for `system`.
  pub fn validate(&self, system: &System, manifest: &Manifest) -> Result<(), OutputError> {
    let check = |output: String, hash: &ObjectHash| -> Result<(), OutputError> {
      let def = manifest.get(hash).ok_or_else(|| OutputError::UnknownBuild {
        output: output.clone(),
        hash: hash.clone(),
      })?;
      if def.system != *system {
        return Err(OutputError::WrongSystem {
          output,
          expected: system.triple(),
          actual: def.system.triple(),
        });
      }
      Ok(())
    };

    for (name, hash) in &self.packages {
      check(format!("packages.{name}"), hash)?;
    }
    for (name, hash) in &self.checks {
      check(format!("checks.{name}"), hash)?;
    }
    for (name, app) in &self.apps {
      check(format!("apps.{name}"), &app.package)?;
      if app.program.trim().is_empty() {
        return Err(OutputError::EmptyProgram {
          output: format!("apps.{name}"),
        });
      }
    }
    for (name, shell) in &self.dev_shells {
      for hash in shell.required_builds() {
        check(format!("devShells.{name}"), &hash)?;
      }
    }
    Ok(())
  }

  /// The build an output reference realizes. Apps realize their package.
  pub fn build_for(&self, output: &OutputRef, system: &System) -> Result<ObjectHash, OutputError> {
    let missing = || OutputError::Missing {
      output: output.to_string(),
      system: system.triple(),
    };
    match output.kind {
      OutputKind::Packages => self.packages.get(&output.name).cloned().ok_or_else(missing),
      OutputKind::Checks => self.checks.get(&output.name).cloned().ok_or_else(missing),
      OutputKind::Apps => self.apps.get(&output.name).map(|a| a.package.clone()).ok_or_else(missing),
      OutputKind::DevShells => Err(missing()),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.packages.is_empty() && self.apps.is_empty() && self.checks.is_empty() && self.dev_shells.is_empty()
  }
}

/// Outputs of one flake across every evaluated system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlakeOutputs {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub systems: BTreeMap<System, SystemOutputs>,
}

impl FlakeOutputs {
  pub fn for_system(&self, system: &System) -> Result<&SystemOutputs, OutputError> {
    self
      .systems
      .get(system)
      .ok_or_else(|| OutputError::NoSuchSystem(system.triple()))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
  Packages,
  Apps,
  Checks,
  DevShells,
}

impl OutputKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OutputKind::Packages => "packages",
      OutputKind::Apps => "apps",
      OutputKind::Checks => "checks",
      OutputKind::DevShells => "devShells",
    }
  }
}

/// `packages.default`, `apps.server`, or a bare name resolved against a
/// command-specific default kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
  pub kind: OutputKind,
  pub name: String,
}

impl OutputRef {
  pub fn parse(s: &str, default_kind: OutputKind) -> Result<Self, OutputError> {
    let invalid = || OutputError::InvalidRef(s.to_string());
    let (kind, name) = match s.split_once('.') {
      None => (default_kind, s),
      Some((prefix, name)) => {
        let kind = match prefix {
          "packages" => OutputKind::Packages,
          "apps" => OutputKind::Apps,
          "checks" => OutputKind::Checks,
          "devShells" => OutputKind::DevShells,
          _ => return Err(invalid()),
        };
        (kind, name)
      }
    };
    if name.is_empty() || name.contains('.') {
      return Err(invalid());
    }
    Ok(Self {
      kind,
      name: name.to_string(),
    })
  }

  pub fn default_of(kind: OutputKind) -> Self {
    Self {
      kind,
      name: "default".to_string(),
    }
  }
}

impl fmt::Display for OutputRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.kind.as_str(), self.name)
  }
}
