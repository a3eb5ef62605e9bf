//! The `flake` global.
//!
//! - `flake.system`, `flake.os`, `flake.arch`, `flake.dir`, `flake.systems`
//! - `flake.toolchain(path?)` - a pinned toolchain from a toolchain file
//! - `flake.source(path?)` - a fingerprinted cargo project
//! - `flake.platform_inputs(system?, mapping?)` - extra link inputs for a system
//! - `flake.build_deps(toolchain, args)` - the cached dependency build
//! - `flake.build_package(toolchain, args, deps?)` - the package build
//! - `flake.app(pkg, bin?)` - a runnable entry
//! - `flake.interpreter_env{ interpreter?, libraries }` - a virtual environment
//! - `flake.shell{ toolchain?, packages?, checks? }` - a dev shell
//! - `flake.run_command(name, cmd, { tools? })` - an arbitrary build

use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::prelude::*;

use super::refs::{
  build_from_lua, build_to_lua, is_build_ref, source_from_lua, string_list, table_values, toolchain_from_lua,
};
use super::runtime::FlakeContext;
use crate::build::cargo::{self, BuildArgs};
use crate::build::source::SourceTree;
use crate::build::{BuildAction, ToolRef};
use crate::flake::{App, DevShell, ShellPackage};
use crate::platform::{DEFAULT_SYSTEMS, PlatformInputs, System};
use crate::toolchain::ToolchainSpec;
use crate::util::hash::Hashable;

const TOOLCHAIN_FILES: &[&str] = &["rust-toolchain.toml", "rust-toolchain"];

pub fn register_globals(lua: &Lua, ctx: FlakeContext) -> LuaResult<()> {
  let ctx = Rc::new(ctx);
  let flake = lua.create_table()?;

  flake.set("system", ctx.system.triple())?;
  flake.set("os", ctx.system.os.as_str())?;
  flake.set("arch", ctx.system.arch.as_str())?;
  flake.set("dir", ctx.dir.to_string_lossy().to_string())?;
  flake.set("systems", DEFAULT_SYSTEMS.to_vec())?;

  let c = ctx.clone();
  flake.set(
    "toolchain",
    lua.create_function(move |lua, path: Option<String>| lua.create_userdata(load_toolchain(&c, path)?))?,
  )?;

  let c = ctx.clone();
  flake.set(
    "source",
    lua.create_function(move |lua, path: Option<String>| {
      let root = path.map(|p| c.resolve(&p)).unwrap_or_else(|| c.dir.clone());
      let tree = SourceTree::scan(&root).map_err(LuaError::external)?;
      lua.create_userdata(tree)
    })?,
  )?;

  let c = ctx.clone();
  flake.set(
    "platform_inputs",
    lua.create_function(move |_, (first, second): (LuaValue, Option<LuaTable>)| {
      let (system, mapping) = match first {
        LuaValue::String(s) => (s.to_str()?.parse::<System>().map_err(LuaError::external)?, second),
        LuaValue::Table(t) => (c.system, Some(t)),
        LuaValue::Nil => (c.system, second),
        other => {
          return Err(LuaError::external(format!(
            "platform_inputs: expected a system or a mapping, got {}",
            other.type_name()
          )));
        }
      };
      let inputs = match mapping {
        Some(t) => parse_mapping(&t)?,
        None => PlatformInputs::default(),
      };
      Ok(inputs.for_system(&system))
    })?,
  )?;

  let c = ctx.clone();
  flake.set(
    "build_deps",
    lua.create_function(move |lua, (toolchain, args): (LuaValue, LuaTable)| {
      let toolchain = toolchain_from_lua(&toolchain, "build_deps")?;
      let args = build_args(&args, "build_deps")?;
      let (hash, def) = c.register(cargo::deps_build(&toolchain, &args, &c.system))?;
      build_to_lua(lua, &hash, &def)
    })?,
  )?;

  let c = ctx.clone();
  flake.set(
    "build_package",
    lua.create_function(move |lua, (toolchain, args, deps): (LuaValue, LuaTable, Option<LuaValue>)| {
      let toolchain = toolchain_from_lua(&toolchain, "build_package")?;
      let args = build_args(&args, "build_package")?;

      let deps = match deps {
        None | Some(LuaValue::Nil) => None,
        Some(value) => {
          let hash = build_from_lua(&value, &c.manifest.borrow(), "build_package deps")?;
          // The cache is only valid for the exact arguments it was built from.
          let expected = c
            .prepare(cargo::deps_build(&toolchain, &args, &c.system))
            .compute_hash()
            .map_err(LuaError::external)?;
          if hash != expected {
            return Err(LuaError::external(
              "build_package: deps was built with a different toolchain or arguments",
            ));
          }
          Some(hash)
        }
      };

      let (hash, def) = c.register(cargo::package_build(&toolchain, &args, deps.as_ref(), &c.system))?;
      build_to_lua(lua, &hash, &def)
    })?,
  )?;

  let c = ctx.clone();
  flake.set(
    "app",
    lua.create_function(move |lua, (pkg, bin): (LuaValue, Option<String>)| {
      let manifest = c.manifest.borrow();
      let hash = build_from_lua(&pkg, &manifest, "app")?;
      let def = manifest
        .get(&hash)
        .ok_or_else(|| LuaError::external(format!("app: build {hash} is not registered")))?;
      let program = bin
        .or_else(|| def.main_program.clone())
        .unwrap_or_else(|| def.name.clone());

      let installed = def.actions.iter().find_map(|a| match a {
        BuildAction::InstallBins { names, .. } if !names.is_empty() => Some(names),
        _ => None,
      });
      if let Some(names) = installed
        && !names.contains(&program)
      {
        return Err(LuaError::external(format!(
          "app: {} has no binary '{}' (available: {})",
          def.name,
          program,
          names.join(", ")
        )));
      }
      lua.create_userdata(App::new(hash, format!("bin/{program}")))
    })?,
  )?;

  let c = ctx.clone();
  flake.set(
    "interpreter_env",
    lua.create_function(move |lua, opts: LuaTable| {
      check_keys(&opts, &["interpreter", "libraries"], "interpreter_env")?;
      let interpreter = opts
        .get::<Option<String>>("interpreter")?
        .unwrap_or_else(|| "python3".to_string());
      let libraries = string_list(opts.get("libraries")?, "interpreter_env.libraries")?;
      let (hash, def) = c.register(cargo::interpreter_env(&interpreter, &libraries, &c.system))?;
      build_to_lua(lua, &hash, &def)
    })?,
  )?;

  let c = ctx.clone();
  flake.set(
    "shell",
    lua.create_function(move |lua, opts: LuaTable| {
      check_keys(&opts, &["toolchain", "packages", "checks"], "shell")?;
      let manifest = c.manifest.borrow();
      let mut shell = DevShell::default();

      let toolchain: LuaValue = opts.get("toolchain")?;
      if !toolchain.is_nil() {
        shell.toolchain = Some(toolchain_from_lua(&toolchain, "shell.toolchain")?);
      }
      if let Some(packages) = opts.get::<Option<LuaTable>>("packages")? {
        for value in table_values(&packages)? {
          let pkg = match &value {
            LuaValue::String(name) => ShellPackage::Index(name.to_str()?.to_string()),
            _ => ShellPackage::Build(build_from_lua(&value, &manifest, "shell.packages")?),
          };
          shell.packages.push(pkg);
        }
      }
      if let Some(checks) = opts.get::<Option<LuaTable>>("checks")? {
        for value in table_values(&checks)? {
          let hash = build_from_lua(&value, &manifest, "shell.checks")?;
          if !shell.checks.contains(&hash) {
            shell.checks.push(hash);
          }
        }
      }
      lua.create_userdata(shell)
    })?,
  )?;

  let c = ctx;
  flake.set(
    "run_command",
    lua.create_function(move |lua, (name, cmd, opts): (String, String, Option<LuaTable>)| {
      let mut tools = Vec::new();
      if let Some(opts) = &opts {
        check_keys(opts, &["tools"], "run_command")?;
        if let Some(list) = opts.get::<Option<LuaTable>>("tools")? {
          let manifest = c.manifest.borrow();
          for value in table_values(&list)? {
            let tool = match &value {
              LuaValue::String(s) => ToolRef::Package(s.to_str()?.to_string()),
              LuaValue::UserData(_) => ToolRef::Toolchain(toolchain_from_lua(&value, "run_command.tools")?),
              v if is_build_ref(v) => ToolRef::Build(build_from_lua(v, &manifest, "run_command.tools")?),
              other => {
                return Err(LuaError::external(format!(
                  "run_command.tools: unsupported tool of type {}",
                  other.type_name()
                )));
              }
            };
            tools.push(tool);
          }
        }
      }
      let (hash, def) = c.register(cargo::run_command(&name, &cmd, tools, &c.system))?;
      build_to_lua(lua, &hash, &def)
    })?,
  )?;

  lua.globals().set("flake", flake)?;
  Ok(())
}

fn load_toolchain(ctx: &FlakeContext, path: Option<String>) -> LuaResult<ToolchainSpec> {
  let target = match path {
    Some(p) => ctx.resolve(&p),
    None => ctx.dir.clone(),
  };
  let file = if target.is_dir() {
    TOOLCHAIN_FILES
      .iter()
      .map(|name| target.join(name))
      .find(|p| p.is_file())
      .unwrap_or_else(|| target.join(TOOLCHAIN_FILES[0]))
  } else {
    target
  };
  ToolchainSpec::from_file(&file).map_err(LuaError::external)
}

fn build_args(table: &LuaTable, what: &str) -> LuaResult<BuildArgs> {
  check_keys(table, &["src", "strict_deps", "build_inputs"], what)?;
  let src = source_from_lua(&table.get::<LuaValue>("src")?, &format!("{what} args.src"))?;
  let mut args = BuildArgs::new(src);
  args.strict_deps = table.get::<Option<bool>>("strict_deps")?.unwrap_or(false);
  args.build_inputs = string_list(table.get("build_inputs")?, &format!("{what} args.build_inputs"))?;
  Ok(args)
}

fn parse_mapping(table: &LuaTable) -> LuaResult<PlatformInputs> {
  let mut map = BTreeMap::new();
  for pair in table.pairs::<String, LuaValue>() {
    let (key, value) = pair?;
    map.insert(key.clone(), string_list(value, &format!("platform_inputs.{key}"))?);
  }
  Ok(PlatformInputs::from_map(map))
}

/// Unknown keys are almost always typos; reject them instead of ignoring them.
fn check_keys(table: &LuaTable, allowed: &[&str], what: &str) -> LuaResult<()> {
  for pair in table.pairs::<LuaValue, LuaValue>() {
    let (key, _) = pair?;
    let name = match &key {
      LuaValue::String(s) => s.to_str()?.to_string(),
      other => format!("{other:?}"),
    };
    if !allowed.contains(&name.as_str()) {
      return Err(LuaError::external(format!(
        "{what}: unknown field '{name}' (expected one of: {})",
        allowed.join(", ")
      )));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::BuildKind;
  use crate::lua::runtime::create_runtime;
  use crate::manifest::Manifest;
  use crate::util::hash::ObjectHash;
  use std::cell::RefCell;
  use std::fs;
  use std::path::Path;
  use tempfile::TempDir;

  fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(
      dir.path().join("Cargo.toml"),
      "[package]\nname = \"engine\"\nversion = \"0.1.0\"\n\n[dependencies]\nserde = \"1\"\n",
    )
    .unwrap();
    fs::write(dir.path().join("Cargo.lock"), "version = 4\n").unwrap();
    fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
    fs::write(dir.path().join("rust-toolchain.toml"), "[toolchain]\nchannel = \"1.83.0\"\n").unwrap();
    dir
  }

  fn runtime(dir: &Path, system: &str) -> (Lua, Rc<RefCell<Manifest>>) {
    let manifest = Rc::new(RefCell::new(Manifest::default()));
    let ctx = FlakeContext::new(system.parse().unwrap(), dir, manifest.clone());
    (create_runtime(ctx).unwrap(), manifest)
  }

  fn hash_of(lua: &Lua, expr: &str) -> ObjectHash {
    ObjectHash(lua.load(format!("return ({expr}).hash")).eval::<String>().unwrap())
  }

  const PACKAGE: &str = r#"
    local tc = flake.toolchain()
    local args = { src = flake.source(), strict_deps = true, build_inputs = flake.platform_inputs() }
    deps = flake.build_deps(tc, args)
    pkg = flake.build_package(tc, args, deps)
  "#;

  mod platform {
    use super::*;

    #[test]
    fn extra_input_only_on_darwin() {
      let dir = project();
      for (system, expected) in [
        ("x86_64-linux", vec![]),
        ("aarch64-linux", vec![]),
        ("x86_64-darwin", vec!["libiconv"]),
        ("aarch64-darwin", vec!["libiconv"]),
      ] {
        let (lua, manifest) = runtime(dir.path(), system);
        let inputs: Vec<String> = lua.load("return flake.platform_inputs()").eval().unwrap();
        assert_eq!(inputs, expected, "{system}");

        lua.load(PACKAGE).exec().unwrap();
        let pkg = manifest.borrow().get(&hash_of(&lua, "pkg")).cloned().unwrap();
        assert_eq!(pkg.link_inputs, expected, "{system}");
      }
    }

    #[test]
    fn explicit_system_and_mapping() {
      let dir = project();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      let inputs: Vec<String> = lua
        .load(r#"return flake.platform_inputs("aarch64-darwin", { darwin = { "libiconv" }, ["aarch64-darwin"] = { "Security" } })"#)
        .eval()
        .unwrap();
      assert_eq!(inputs, vec!["libiconv", "Security"]);
    }

    #[test]
    fn system_fields() {
      let dir = project();
      let (lua, _) = runtime(dir.path(), "aarch64-darwin");
      let (system, os, arch): (String, String, String) =
        lua.load("return flake.system, flake.os, flake.arch").eval().unwrap();
      assert_eq!((system.as_str(), os.as_str(), arch.as_str()), ("aarch64-darwin", "darwin", "aarch64"));
    }
  }

  mod cargo_builds {
    use super::*;

    #[test]
    fn package_depends_on_deps() {
      let dir = project();
      let (lua, manifest) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();

      let deps = hash_of(&lua, "deps");
      let pkg = manifest.borrow().get(&hash_of(&lua, "pkg")).cloned().unwrap();
      assert_eq!(pkg.kind, BuildKind::CargoPackage);
      assert_eq!(pkg.deps, vec![deps]);
      assert!(pkg.strict_deps);
      assert_eq!(pkg.main_program.as_deref(), Some("engine"));
    }

    #[test]
    fn source_edit_keeps_deps_hash() {
      let dir = project();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();
      let (deps_before, pkg_before) = (hash_of(&lua, "deps"), hash_of(&lua, "pkg"));

      fs::write(dir.path().join("src/main.rs"), "fn main() { println!(\"hi\"); }\n").unwrap();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();

      assert_eq!(hash_of(&lua, "deps"), deps_before);
      assert_ne!(hash_of(&lua, "pkg"), pkg_before);
    }

    #[test]
    fn manifest_edit_changes_deps_hash() {
      let dir = project();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();
      let before = hash_of(&lua, "deps");

      fs::write(dir.path().join("Cargo.lock"), "version = 4\n# serde 1.0.210\n").unwrap();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();

      assert_ne!(hash_of(&lua, "deps"), before);
    }

    #[test]
    fn deps_from_other_arguments_are_rejected() {
      let dir = project();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      let err = lua
        .load(
          r#"
          local tc = flake.toolchain()
          local deps = flake.build_deps(tc, { src = flake.source() })
          flake.build_package(tc, { src = flake.source(), build_inputs = { "openssl" } }, deps)
        "#,
        )
        .exec()
        .unwrap_err();
      assert!(err.to_string().contains("different toolchain or arguments"));
    }

    #[test]
    fn minimal_strategy_builds_without_deps() {
      let dir = project();
      let (lua, manifest) = runtime(dir.path(), "x86_64-linux");
      lua
        .load("pkg = flake.build_package(flake.toolchain(), { src = flake.source() })")
        .exec()
        .unwrap();
      let pkg = manifest.borrow().get(&hash_of(&lua, "pkg")).cloned().unwrap();
      assert!(pkg.deps.is_empty());
      assert_eq!(manifest.borrow().builds.len(), 1);
    }

    #[test]
    fn mistyped_argument_is_rejected() {
      let dir = project();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      let err = lua
        .load("flake.build_deps(flake.toolchain(), { src = flake.source(), buildInputs = {} })")
        .exec()
        .unwrap_err();
      assert!(err.to_string().contains("unknown field 'buildInputs'"));
    }

    #[test]
    fn missing_toolchain_file_is_an_error() {
      let dir = project();
      fs::remove_file(dir.path().join("rust-toolchain.toml")).unwrap();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      let err = lua.load("flake.toolchain()").exec().unwrap_err();
      assert!(err.to_string().contains("rust-toolchain.toml"));
    }
  }

  mod surface {
    use super::*;

    #[test]
    fn app_defaults_to_main_program() {
      let dir = project();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();
      let (kind, program): (String, String) = lua
        .load("local app = flake.app(pkg) return app.type, app.program")
        .eval()
        .unwrap();
      assert_eq!(kind, "app");
      assert_eq!(program, "bin/engine");
    }

    #[test]
    fn app_with_unknown_binary_is_rejected() {
      let dir = project();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();
      let err = lua.load("flake.app(pkg, 'server')").exec().unwrap_err();
      assert!(err.to_string().contains("no binary 'server'"));
    }

    #[test]
    fn app_of_nil_is_rejected() {
      let dir = project();
      let (lua, _) = runtime(dir.path(), "x86_64-linux");
      let err = lua.load("flake.app(nil)").exec().unwrap_err();
      assert!(err.to_string().contains("app: expected a build"));
    }

    #[test]
    fn shell_collects_packages_and_checks() {
      let dir = project();
      let (lua, manifest) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();
      lua
        .load(
          r#"
          py = flake.interpreter_env { libraries = { "numpy", "pygame" } }
          sh = flake.shell {
            toolchain = flake.toolchain(),
            packages = { py, "maven", "jdk" },
            checks = { build = pkg },
          }
        "#,
        )
        .exec()
        .unwrap();

      let py = hash_of(&lua, "py");
      let env = manifest.borrow().get(&py).cloned().unwrap();
      assert_eq!(
        env.kind,
        BuildKind::InterpreterEnv {
          interpreter: "python3".to_string(),
          libraries: vec!["numpy".to_string(), "pygame".to_string()],
        }
      );

      let ud: LuaAnyUserData = lua.globals().get("sh").unwrap();
      let shell = ud.borrow::<DevShell>().unwrap();
      assert_eq!(shell.checks, vec![hash_of(&lua, "pkg")]);
      assert_eq!(
        shell.packages,
        vec![
          ShellPackage::Build(py),
          ShellPackage::Index("maven".to_string()),
          ShellPackage::Index("jdk".to_string()),
        ]
      );
      assert_eq!(shell.toolchain.as_ref().unwrap().channel, "1.83.0");
    }

    #[test]
    fn run_command_depends_on_build_tools() {
      let dir = project();
      let (lua, manifest) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();
      lua
        .load(r#"chk = flake.run_command("smoke", "engine --help", { tools = { pkg, "coreutils" } })"#)
        .exec()
        .unwrap();

      let chk = manifest.borrow().get(&hash_of(&lua, "chk")).cloned().unwrap();
      assert_eq!(chk.deps, vec![hash_of(&lua, "pkg")]);
      assert!(chk.tools.contains(&ToolRef::Package("coreutils".to_string())));
    }

    #[test]
    fn identical_builds_are_registered_once() {
      let dir = project();
      let (lua, manifest) = runtime(dir.path(), "x86_64-linux");
      lua.load(PACKAGE).exec().unwrap();
      lua.load(PACKAGE).exec().unwrap();
      assert_eq!(manifest.borrow().builds.len(), 2);
    }
  }
}
