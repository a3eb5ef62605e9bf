use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::prelude::*;

use crate::build::{BuildDef, ToolRef};
use crate::lua::globals;
use crate::manifest::Manifest;
use crate::platform::System;
use crate::util::hash::ObjectHash;

/// What one evaluation of a flake file sees.
#[derive(Debug, Clone)]
pub struct FlakeContext {
  pub system: System,
  /// Directory of the flake file. Relative paths resolve against it.
  pub dir: PathBuf,
  /// Revision of the pinned package index, recorded on builds that use it.
  pub index_rev: Option<String>,
  pub manifest: Rc<RefCell<Manifest>>,
}

impl FlakeContext {
  pub fn new(system: System, dir: impl Into<PathBuf>, manifest: Rc<RefCell<Manifest>>) -> Self {
    Self {
      system,
      dir: dir.into(),
      index_rev: None,
      manifest,
    }
  }

  pub fn resolve(&self, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.dir.join(path)
    }
  }

  /// Stamp `def` with the package index revision if it looks anything up
  /// in the index.
  pub fn prepare(&self, mut def: BuildDef) -> BuildDef {
    let uses_index = !def.link_inputs.is_empty() || def.tools.iter().any(|t| matches!(t, ToolRef::Package(_)));
    if uses_index {
      def.index_rev = self.index_rev.clone();
    }
    def
  }

  /// Add a build to the manifest, returning its hash and the stored definition.
  pub fn register(&self, def: BuildDef) -> LuaResult<(ObjectHash, BuildDef)> {
    let def = self.prepare(def);
    let hash = self
      .manifest
      .borrow_mut()
      .register(def.clone())
      .map_err(|e| LuaError::external(format!("failed to hash build '{}': {}", def.name, e)))?;
    Ok((hash, def))
  }
}

/// A VM with the `flake` global for `ctx.system`.
pub fn create_runtime(ctx: FlakeContext) -> LuaResult<Lua> {
  let lua = Lua::new();
  let package: LuaTable = lua.globals().get("package")?;
  let current: String = package.get("path")?;
  let lua_dir = ctx.dir.join("lua").to_string_lossy().replace('\\', "/");
  package.set("path", format!("{lua_dir}/?.lua;{lua_dir}/?/init.lua;{current}"))?;

  globals::register_globals(&lua, ctx)?;
  Ok(lua)
}

/// Execute the file at `path` and return its value.
pub fn load_file(lua: &Lua, path: &Path) -> LuaResult<LuaValue> {
  let canonical = dunce::canonicalize(path)
    .map_err(|e| LuaError::external(format!("cannot open '{}': {}", path.display(), e)))?;
  let content = std::fs::read_to_string(&canonical)
    .map_err(|e| LuaError::external(format!("cannot read '{}': {}", canonical.display(), e)))?;

  lua
    .load(&content)
    .set_name(format!("@{}", canonical.display()))
    .eval::<LuaValue>()
}
