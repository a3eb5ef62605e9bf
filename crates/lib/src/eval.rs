//! Flake evaluation.
//!
//! [`evaluate_flake`] turns a `flake.lua` into an [`Evaluation`]:
//! 1. the flake file is loaded once to read its inputs, systems and index
//! 2. inputs are resolved against `flint.lock`
//! 3. for every system a fresh VM calls `outputs(inputs, system)`
//! 4. the outputs are validated against the shared manifest
//!
//! Evaluation never builds anything.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::prelude::*;
use tracing::{debug, info, warn};

use crate::flake::{FlakeOutputs, OutputError};
use crate::inputs::lock::LOCK_FILENAME;
use crate::inputs::resolve::{ForceUpdate, ResolutionResult, ResolveError, resolve_inputs, save_lock_file_if_changed};
use crate::inputs::{InputDecls, ResolvedInputs};
use crate::lua::entrypoint::load_flake;
use crate::lua::outputs::parse_outputs;
use crate::lua::runtime::{self, FlakeContext};
use crate::manifest::Manifest;
use crate::pkgs::IndexChain;
use crate::platform::System;

/// Input that provides the package index when the flake does not name one.
const DEFAULT_INDEX_INPUT: &str = "pkgs";

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
  #[error("flake not found: {0}")]
  NotFound(PathBuf),

  #[error("lua error: {0}")]
  Lua(#[from] LuaError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error("index input '{0}' is not declared")]
  UnknownIndex(String),

  #[error("flake does not support {0}")]
  UnsupportedSystem(String),

  #[error("outputs for {system}: {source}")]
  Outputs {
    system: String,
    #[source]
    source: OutputError,
  },
}

#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
  /// Evaluate only these systems. `None` evaluates every system the flake supports.
  pub systems: Option<Vec<System>>,
  pub force_update: ForceUpdate,
  /// Write `flint.lock` even if one exists. Without it the lock is only
  /// written on first resolution.
  pub write_lock: bool,
}

impl EvalOptions {
  pub fn for_system(system: System) -> Self {
    Self {
      systems: Some(vec![system]),
      ..Self::default()
    }
  }
}

#[derive(Debug)]
pub struct Evaluation {
  /// Canonical path of the flake file.
  pub path: PathBuf,
  pub dir: PathBuf,
  pub inputs: ResolvedInputs,
  pub lock_changed: bool,
  /// Root of the pinned package index, if the flake declares one.
  pub index: Option<PathBuf>,
  pub manifest: Manifest,
  pub outputs: FlakeOutputs,
}

impl Evaluation {
  pub fn package_index(&self) -> IndexChain {
    IndexChain::standard(self.index.as_deref())
  }
}

struct FlakeHeader {
  description: Option<String>,
  systems: Vec<System>,
  index: Option<String>,
  inputs: InputDecls,
}

/// Evaluate the flake at `path` for the requested systems.
pub fn evaluate_flake(path: &Path, opts: &EvalOptions) -> Result<Evaluation, EvalError> {
  let path = dunce::canonicalize(path).map_err(|_| EvalError::NotFound(path.to_path_buf()))?;
  let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

  let header = read_header(&path, &dir)?;
  let systems = select_systems(&header.systems, opts.systems.as_deref())?;

  let resolution = resolve(&header.inputs, &dir, &opts.force_update, opts.write_lock)?;
  let inputs = resolution.inputs;

  let index_name = match &header.index {
    Some(name) if !inputs.contains_key(name) => return Err(EvalError::UnknownIndex(name.clone())),
    Some(name) => Some(name.as_str()),
    None => inputs.contains_key(DEFAULT_INDEX_INPUT).then_some(DEFAULT_INDEX_INPUT),
  };
  let index = index_name.and_then(|n| inputs.get(n));
  let index_rev = index.map(|i| i.rev.clone());

  let manifest = Rc::new(RefCell::new(Manifest::default()));
  let mut outputs = FlakeOutputs {
    description: header.description,
    ..FlakeOutputs::default()
  };

  for system in systems {
    debug!(system = %system, "evaluating outputs");
    let mut ctx = FlakeContext::new(system, &dir, manifest.clone());
    ctx.index_rev = index_rev.clone();
    let lua = runtime::create_runtime(ctx)?;
    set_package_path(&lua, &dir, &inputs)?;
    let file = load_flake(&lua, &path)?;

    let args = inputs_table(&lua, &inputs, &dir)?;
    let value: LuaValue = file.outputs.call((args, system.triple()))?;
    let LuaValue::Table(table) = value else {
      return Err(LuaError::external(format!("outputs({}) must return a table", system)).into());
    };

    let system_outputs = parse_outputs(&table, &manifest.borrow())?;
    system_outputs
      .validate(&system, &manifest.borrow())
      .map_err(|source| EvalError::Outputs {
        system: system.triple(),
        source,
      })?;
    outputs.systems.insert(system, system_outputs);
  }

  let manifest = Rc::try_unwrap(manifest)
    .map(RefCell::into_inner)
    .unwrap_or_else(|shared| shared.borrow().clone());
  info!(
    systems = outputs.systems.len(),
    builds = manifest.builds.len(),
    "evaluated flake"
  );

  Ok(Evaluation {
    index: index.map(|i| i.path.clone()),
    path,
    dir,
    inputs,
    lock_changed: resolution.lock_changed,
    manifest,
    outputs,
  })
}

/// Resolve and lock the inputs of the flake at `path` without evaluating outputs.
pub fn lock_flake(path: &Path, force_update: &ForceUpdate) -> Result<ResolutionResult, EvalError> {
  let path = dunce::canonicalize(path).map_err(|_| EvalError::NotFound(path.to_path_buf()))?;
  let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
  let header = read_header(&path, &dir)?;
  resolve(&header.inputs, &dir, force_update, true)
}

fn read_header(path: &Path, dir: &Path) -> Result<FlakeHeader, EvalError> {
  let system = System::current().ok_or_else(|| EvalError::UnsupportedSystem("host".to_string()))?;
  let lua = runtime::create_runtime(FlakeContext::new(
    system,
    dir,
    Rc::new(RefCell::new(Manifest::default())),
  ))?;
  let file = load_flake(&lua, path)?;
  Ok(FlakeHeader {
    description: file.description,
    systems: file.systems.unwrap_or_else(System::defaults),
    index: file.index,
    inputs: file.inputs,
  })
}

fn select_systems(supported: &[System], requested: Option<&[System]>) -> Result<Vec<System>, EvalError> {
  match requested {
    None => Ok(supported.to_vec()),
    Some(requested) => {
      if let Some(missing) = requested.iter().find(|s| !supported.contains(s)) {
        return Err(EvalError::UnsupportedSystem(missing.triple()));
      }
      Ok(requested.to_vec())
    }
  }
}

fn resolve(
  decls: &InputDecls,
  dir: &Path,
  force_update: &ForceUpdate,
  write_lock: bool,
) -> Result<ResolutionResult, EvalError> {
  let result = resolve_inputs(decls, dir, force_update)?;
  let lock_exists = dir.join(LOCK_FILENAME).is_file();
  if write_lock || !lock_exists {
    save_lock_file_if_changed(&result, dir)?;
  } else if result.lock_changed {
    warn!("{} is out of date, run `flint lock` to update it", LOCK_FILENAME);
  }
  Ok(result)
}

/// Make `require` find modules in the flake's `lua/` directory first, then
/// in the `lua/` directories of every input, transitive ones included.
fn set_package_path(lua: &Lua, dir: &Path, inputs: &ResolvedInputs) -> LuaResult<()> {
  let mut paths = Vec::new();
  push_lua_dir(&dir.join("lua"), &mut paths);
  collect_lua_paths(inputs, &mut paths);
  if paths.is_empty() {
    return Ok(());
  }

  let package: LuaTable = lua.globals().get("package")?;
  let current: String = package.get("path")?;
  package.set("path", format!("{};{}", paths.join(";"), current))?;
  debug!(package_path = %paths.join(";"), "set package.path");
  Ok(())
}

fn collect_lua_paths(inputs: &ResolvedInputs, paths: &mut Vec<String>) {
  for input in inputs.values() {
    push_lua_dir(&input.path.join("lua"), paths);
    collect_lua_paths(&input.inputs, paths);
  }
}

fn push_lua_dir(lua_dir: &Path, paths: &mut Vec<String>) {
  if lua_dir.is_dir() {
    let lua_dir = lua_dir.to_string_lossy().replace('\\', "/");
    paths.push(format!("{lua_dir}/?.lua"));
    paths.push(format!("{lua_dir}/?/init.lua"));
  }
}

/// `inputs` as handed to `outputs()`: `{ name = { path, rev, inputs } }`,
/// plus `self` for the flake's own directory.
fn inputs_table(lua: &Lua, inputs: &ResolvedInputs, dir: &Path) -> LuaResult<LuaTable> {
  let table = nested_inputs(lua, inputs)?;
  let this = lua.create_table()?;
  this.set("path", dir.to_string_lossy().to_string())?;
  this.set("rev", "local")?;
  table.set("self", this)?;
  Ok(table)
}

fn nested_inputs(lua: &Lua, inputs: &ResolvedInputs) -> LuaResult<LuaTable> {
  let table = lua.create_table()?;
  for (name, input) in inputs {
    let entry = lua.create_table()?;
    entry.set("path", input.path.to_string_lossy().to_string())?;
    entry.set("rev", input.rev.as_str())?;
    entry.set("inputs", nested_inputs(lua, &input.inputs)?)?;
    table.set(name.as_str(), entry)?;
  }
  Ok(table)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::BuildKind;
  use crate::flake::ShellPackage;
  use std::fs;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  const FLAKE: &str = r#"
return {
  description = "engine",
  inputs = {
    pkgs = "path:./index",
    rust_overlay = { url = "path:./overlay", inputs = { pkgs = { follows = "pkgs" } } },
  },
  outputs = function(inputs, system)
    local toolchain = flake.toolchain("rust-toolchain.toml")
    local args = {
      src = flake.source(inputs.self.path),
      strict_deps = true,
      build_inputs = flake.platform_inputs(system),
    }
    local deps = flake.build_deps(toolchain, args)
    local pkg = flake.build_package(toolchain, args, deps)
    return {
      packages = { default = pkg },
      apps = { default = flake.app(pkg) },
      checks = { build = pkg },
      devShells = {
        default = flake.shell {
          toolchain = toolchain,
          packages = {
            flake.interpreter_env { libraries = { "numpy", "pygame" } },
            "maven",
            "jdk",
          },
          checks = { pkg },
        },
      },
    }
  end,
}
"#;

  fn fixture(flake: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::create_dir_all(root.join("index")).unwrap();
    fs::create_dir_all(root.join("overlay")).unwrap();
    fs::write(root.join("Cargo.toml"), "[package]\nname = \"engine\"\nversion = \"0.1.0\"\n").unwrap();
    fs::write(root.join("Cargo.lock"), "version = 4\n").unwrap();
    fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
    fs::write(root.join("rust-toolchain.toml"), "[toolchain]\nchannel = \"1.83.0\"\n").unwrap();
    fs::write(root.join("flake.lua"), flake).unwrap();
    dir
  }

  fn evaluate(dir: &TempDir) -> Evaluation {
    evaluate_flake(&dir.path().join("flake.lua"), &EvalOptions::default()).unwrap()
  }

  #[test]
  fn evaluates_every_default_system() {
    let dir = fixture(FLAKE);
    let eval = evaluate(&dir);

    assert_eq!(eval.outputs.systems.len(), 4);
    assert_eq!(eval.outputs.description.as_deref(), Some("engine"));
    // deps + package per system, plus one interpreter env per system
    assert_eq!(eval.manifest.builds.len(), 12);
  }

  #[test]
  fn libiconv_only_on_darwin() {
    let dir = fixture(FLAKE);
    let eval = evaluate(&dir);

    for (system, outputs) in &eval.outputs.systems {
      let pkg = eval.manifest.get(&outputs.packages["default"]).unwrap();
      let expected: Vec<String> = if system.triple().ends_with("darwin") {
        vec!["libiconv".to_string()]
      } else {
        vec![]
      };
      assert_eq!(pkg.link_inputs, expected, "{system}");
    }
  }

  #[test]
  fn package_app_and_check_are_one_build() {
    let dir = fixture(FLAKE);
    let eval = evaluate(&dir);

    for outputs in eval.outputs.systems.values() {
      let pkg = &outputs.packages["default"];
      assert_eq!(&outputs.apps["default"].package, pkg);
      assert_eq!(&outputs.checks["build"], pkg);
      assert_eq!(outputs.apps["default"].program, "bin/engine");
    }
  }

  #[test]
  fn dev_shell_has_interpreter_with_two_libraries_everywhere() {
    let dir = fixture(FLAKE);
    let eval = evaluate(&dir);

    for (system, outputs) in &eval.outputs.systems {
      let shell = &outputs.dev_shells["default"];
      let envs: Vec<_> = shell
        .packages
        .iter()
        .filter_map(|p| match p {
          ShellPackage::Build(h) => eval.manifest.get(h),
          ShellPackage::Index(_) => None,
        })
        .collect();
      assert_eq!(envs.len(), 1, "{system}");
      assert_eq!(
        envs[0].kind,
        BuildKind::InterpreterEnv {
          interpreter: "python3".to_string(),
          libraries: vec!["numpy".to_string(), "pygame".to_string()],
        }
      );
      assert_eq!(shell.index_packages().collect::<Vec<_>>(), vec!["maven", "jdk"]);
      assert_eq!(shell.checks, vec![outputs.packages["default"].clone()]);
    }
  }

  #[test]
  fn first_resolution_writes_lock_and_index() {
    let dir = fixture(FLAKE);
    let eval = evaluate(&dir);

    assert!(dir.path().join(LOCK_FILENAME).is_file());
    assert_eq!(eval.index.as_deref(), Some(dunce::canonicalize(dir.path().join("index")).unwrap().as_path()));
    let pkg = eval
      .manifest
      .builds
      .values()
      .find(|d| d.kind == BuildKind::CargoPackage)
      .unwrap();
    assert_eq!(pkg.index_rev.as_deref(), Some("local"));
  }

  #[test]
  fn requested_system_only() {
    let dir = fixture(FLAKE);
    let system: System = "aarch64-linux".parse().unwrap();
    let eval = evaluate_flake(&dir.path().join("flake.lua"), &EvalOptions::for_system(system)).unwrap();
    assert_eq!(eval.outputs.systems.keys().collect::<Vec<_>>(), vec![&system]);
    assert_eq!(eval.manifest.builds.len(), 3);
  }

  #[test]
  fn unsupported_system_is_rejected() {
    let dir = fixture(&FLAKE.replace("description = \"engine\",", "systems = { \"x86_64-linux\" },"));
    let err = evaluate_flake(
      &dir.path().join("flake.lua"),
      &EvalOptions::for_system("aarch64-darwin".parse().unwrap()),
    )
    .unwrap_err();
    assert!(matches!(err, EvalError::UnsupportedSystem(s) if s == "aarch64-darwin"));
  }

  #[test]
  fn undeclared_index_is_rejected() {
    let dir = fixture(&FLAKE.replace("description = \"engine\",", "index = \"nixpkgs\","));
    let err = evaluate_flake(&dir.path().join("flake.lua"), &EvalOptions::default()).unwrap_err();
    assert!(matches!(err, EvalError::UnknownIndex(name) if name == "nixpkgs"));
  }

  #[test]
  fn missing_flake() {
    let dir = TempDir::new().unwrap();
    let err = evaluate_flake(&dir.path().join("flake.lua"), &EvalOptions::default()).unwrap_err();
    assert!(matches!(err, EvalError::NotFound(_)));
  }

  #[test]
  fn outputs_must_return_a_table() {
    let dir = fixture("return { outputs = function() return 42 end }");
    let err = evaluate_flake(&dir.path().join("flake.lua"), &EvalOptions::default()).unwrap_err();
    assert!(err.to_string().contains("must return a table"));
  }

  #[test]
  fn helper_libraries_load_from_inputs() {
    let flake = r#"
return {
  inputs = { helpers = "path:./helpers" },
  outputs = function(inputs, system)
    local checks = require("checks")
    return { checks = { smoke = checks.smoke("engine --version") } }
  end,
}
"#;
    let dir = fixture(flake);
    fs::create_dir_all(dir.path().join("helpers/lua")).unwrap();
    fs::write(
      dir.path().join("helpers/lua/checks.lua"),
      "return { smoke = function(cmd) return flake.run_command('smoke', cmd) end }",
    )
    .unwrap();

    let eval = evaluate(&dir);
    for outputs in eval.outputs.systems.values() {
      let check = eval.manifest.get(&outputs.checks["smoke"]).unwrap();
      assert_eq!(check.name, "smoke");
    }
  }

  #[test]
  #[traced_test]
  fn stale_lock_is_reported_but_kept() {
    let dir = fixture(FLAKE);
    evaluate(&dir);
    let lock_path = dir.path().join(LOCK_FILENAME);
    let before = fs::read_to_string(&lock_path).unwrap();

    fs::create_dir_all(dir.path().join("extra")).unwrap();
    let flake = FLAKE.replace("pkgs = \"path:./index\",", "pkgs = \"path:./index\",\n    extra = \"path:./extra\",");
    fs::write(dir.path().join("flake.lua"), flake).unwrap();

    let eval = evaluate(&dir);
    assert!(eval.lock_changed);
    assert!(eval.inputs.contains_key("extra"));
    assert_eq!(fs::read_to_string(&lock_path).unwrap(), before);
    assert!(logs_contain("out of date"));
  }

  #[test]
  fn lock_flake_writes_lock_file() {
    let dir = fixture(FLAKE);
    let result = lock_flake(&dir.path().join("flake.lua"), &ForceUpdate::None).unwrap();
    assert!(result.inputs.contains_key("pkgs"));
    assert!(dir.path().join(LOCK_FILENAME).is_file());
  }
}
