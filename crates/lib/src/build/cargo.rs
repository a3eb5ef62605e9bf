//! Recipes that turn a source tree into [`BuildDef`]s.
//!
//! A cargo project is built in two steps. The dependency step compiles only
//! what `Cargo.lock` pins and is keyed by the manifests' hash; the package
//! step seeds its target directory from the dependency step and compiles the
//! project itself. Leaving out the dependency step compiles everything in
//! the package step.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::build::source::SourceTree;
use crate::build::{BuildAction, BuildDef, BuildKind, SourceFilter, ToolRef};
use crate::platform::System;
use crate::toolchain::ToolchainSpec;
use crate::util::hash::ObjectHash;

const CARGO_BUILD: &str = "cargo build --release --locked";

/// The linker rustc expects on `PATH`.
const LINKER: &str = "cc";

/// Arguments shared verbatim by the dependency and package steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BuildArgs {
  pub src: SourceTree,
  pub strict_deps: bool,
  /// Native libraries from the package index, e.g. `libiconv` on darwin.
  pub build_inputs: Vec<String>,
}

impl BuildArgs {
  pub fn new(src: SourceTree) -> Self {
    Self {
      src,
      strict_deps: false,
      build_inputs: Vec::new(),
    }
  }

  fn pname(&self) -> String {
    self
      .src
      .name
      .clone()
      .or_else(|| self.src.root.file_name().map(|n| n.to_string_lossy().to_string()))
      .unwrap_or_else(|| "source".to_string())
  }

  fn base_def(&self, name: String, kind: BuildKind, toolchain: &ToolchainSpec, system: &System) -> BuildDef {
    let mut def = BuildDef::new(&name, kind, *system);
    def.version = self.src.version.clone();
    def.tools = vec![ToolRef::Toolchain(toolchain.clone()), ToolRef::Package(LINKER.to_string())];
    def.link_inputs = self.build_inputs.clone();
    def.strict_deps = self.strict_deps;
    def
  }

  fn copy_source(&self, filter: SourceFilter) -> BuildAction {
    let content_hash = match filter {
      SourceFilter::Full => &self.src.hash,
      SourceFilter::DepsOnly => &self.src.deps_hash,
    };
    BuildAction::CopySource {
      src: self.src.root.to_string_lossy().to_string(),
      content_hash: content_hash.0.clone(),
      filter,
      to: "$${out}/tmp/src".to_string(),
    }
  }
}

fn cargo(target_dir: &str) -> BuildAction {
  BuildAction::Cmd {
    cmd: CARGO_BUILD.to_string(),
    env: BTreeMap::from([("CARGO_TARGET_DIR".to_string(), target_dir.to_string())]),
    cwd: Some("$${out}/tmp/src".to_string()),
  }
}

/// Compile the dependencies pinned by the project's lock file.
///
/// Output `target` holds cargo's target directory.
pub fn deps_build(toolchain: &ToolchainSpec, args: &BuildArgs, system: &System) -> BuildDef {
  let mut def = args.base_def(format!("{}-deps", args.pname()), BuildKind::CargoDeps, toolchain, system);
  def.actions = vec![args.copy_source(SourceFilter::DepsOnly), cargo("$${out}/target")];
  def.outputs.insert("target".to_string(), "$${out}/target".to_string());
  def
}

/// Compile the project and install its binaries into `bin/`.
///
/// With `deps`, the target directory starts as a copy of that dependency
/// build's output.
pub fn package_build(
  toolchain: &ToolchainSpec,
  args: &BuildArgs,
  deps: Option<&ObjectHash>,
  system: &System,
) -> BuildDef {
  let mut def = args.base_def(args.pname(), BuildKind::CargoPackage, toolchain, system);

  if let Some(deps) = deps {
    def.deps.push(deps.clone());
    def.actions.push(BuildAction::CopyTree {
      from: format!("$${{build:{}:target}}", deps),
      to: "$${out}/tmp/target".to_string(),
    });
  }
  def.actions.push(args.copy_source(SourceFilter::Full));
  def.actions.push(cargo("$${out}/tmp/target"));
  def.actions.push(BuildAction::InstallBins {
    from: "$${out}/tmp/target/release".to_string(),
    to: "$${out}/bin".to_string(),
    names: args.src.bins.clone(),
  });

  def.outputs.insert("bin".to_string(), "$${out}/bin".to_string());
  def.main_program = args
    .src
    .name
    .clone()
    .filter(|n| args.src.bins.contains(n))
    .or_else(|| args.src.bins.first().cloned());
  def
}

/// A virtual environment with exactly `libraries` installed.
pub fn interpreter_env(interpreter: &str, libraries: &[String], system: &System) -> BuildDef {
  let mut libraries = libraries.to_vec();
  libraries.sort();
  libraries.dedup();

  let mut def = BuildDef::new(
    &format!("{interpreter}-env"),
    BuildKind::InterpreterEnv {
      interpreter: interpreter.to_string(),
      libraries: libraries.clone(),
    },
    *system,
  );
  def.tools = vec![ToolRef::Package(interpreter.to_string())];

  let python = "\"$${out}/bin/python\"";
  def.actions.push(shell(format!("{interpreter} -m venv \"$${{out}}\"")));
  if !libraries.is_empty() {
    def.actions.push(shell(format!(
      "{python} -m pip install --no-cache-dir --disable-pip-version-check {}",
      libraries.join(" ")
    )));
    let modules: Vec<String> = libraries.iter().map(|l| import_name(l)).collect();
    def
      .actions
      .push(shell(format!("{python} -c \"import {}\"", modules.join(", "))));
  }

  def.outputs.insert("bin".to_string(), "$${out}/bin".to_string());
  def
}

/// An arbitrary command run in the build sandbox with `tools` on `PATH`.
pub fn run_command(name: &str, cmd: &str, tools: Vec<ToolRef>, system: &System) -> BuildDef {
  let mut def = BuildDef::new(name, BuildKind::Generic, *system);
  def.tools = tools;
  def.deps = def
    .tools
    .iter()
    .filter_map(|t| match t {
      ToolRef::Build(hash) => Some(hash.clone()),
      _ => None,
    })
    .collect();
  def.actions.push(shell(cmd.to_string()));
  def
}

fn shell(cmd: String) -> BuildAction {
  BuildAction::Cmd {
    cmd,
    env: BTreeMap::new(),
    cwd: None,
  }
}

/// Module name a distribution is imported as, by the common convention.
fn import_name(library: &str) -> String {
  library
    .split(['=', '<', '>', '[', '~', '!'])
    .next()
    .unwrap_or(library)
    .trim()
    .to_lowercase()
    .replace('-', "_")
}
