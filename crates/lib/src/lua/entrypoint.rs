//! The table a flake file returns.
//!
//! ```lua
//! return {
//!   description = "game server",
//!   systems = { "x86_64-linux", "aarch64-darwin" },  -- optional, defaults to all four
//!   index = "pkgs",                                  -- optional package index input
//!   inputs = {
//!     pkgs = "git:https://github.com/org/pkgs.git#24.05",
//!     rust_overlay = {
//!       url = "git:https://github.com/org/rust-overlay.git",
//!       inputs = { pkgs = { follows = "pkgs" } },
//!     },
//!   },
//!   outputs = function(inputs, system) ... end,
//! }
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;

use crate::inputs::{InputDecl, InputDecls, InputOverride};
use crate::lua::runtime::{self, FlakeContext};
use crate::manifest::Manifest;
use crate::platform::System;

const FIELDS: &[&str] = &["description", "systems", "index", "inputs", "outputs"];

/// A loaded flake file.
pub struct FlakeFile {
  pub description: Option<String>,
  pub systems: Option<Vec<System>>,
  pub index: Option<String>,
  pub inputs: InputDecls,
  pub outputs: LuaFunction,
}

/// Run the flake file in `lua` and read its table.
pub fn load_flake(lua: &Lua, path: &Path) -> LuaResult<FlakeFile> {
  let LuaValue::Table(table) = runtime::load_file(lua, path)? else {
    return Err(LuaError::external(format!("{} must return a table", path.display())));
  };

  for pair in table.pairs::<String, LuaValue>() {
    let (key, _) = pair?;
    if !FIELDS.contains(&key.as_str()) {
      return Err(LuaError::external(format!(
        "unknown flake field '{key}' (expected one of: {})",
        FIELDS.join(", ")
      )));
    }
  }

  let systems = match table.get::<Option<Vec<String>>>("systems")? {
    None => None,
    Some(list) => Some(
      list
        .iter()
        .map(|s| s.parse::<System>().map_err(LuaError::external))
        .collect::<LuaResult<Vec<_>>>()?,
    ),
  };

  let outputs = match table.get::<LuaValue>("outputs")? {
    LuaValue::Function(f) => f,
    LuaValue::Nil => return Err(LuaError::external("flake must define an 'outputs' function")),
    other => {
      return Err(LuaError::external(format!(
        "flake 'outputs' must be a function, got {}",
        other.type_name()
      )));
    }
  };

  Ok(FlakeFile {
    description: table.get("description")?,
    systems,
    index: table.get("index")?,
    inputs: parse_inputs(table.get("inputs")?)?,
    outputs,
  })
}

/// Input declarations of the flake at `path`, evaluated for the host system.
pub fn extract_input_decls(path: &Path) -> LuaResult<InputDecls> {
  let system = System::current().ok_or_else(|| LuaError::external("unsupported host platform"))?;
  let dir = path.parent().unwrap_or(Path::new("."));
  let ctx = FlakeContext::new(system, dir, Rc::new(RefCell::new(Manifest::default())));
  let lua = runtime::create_runtime(ctx)?;

  let LuaValue::Table(table) = runtime::load_file(&lua, path)? else {
    return Err(LuaError::external(format!("{} must return a table", path.display())));
  };
  parse_inputs(table.get("inputs")?)
}

fn parse_inputs(value: LuaValue) -> LuaResult<InputDecls> {
  let table = match value {
    LuaValue::Nil => return Ok(BTreeMap::new()),
    LuaValue::Table(t) => t,
    other => {
      return Err(LuaError::external(format!(
        "'inputs' must be a table, got {}",
        other.type_name()
      )));
    }
  };

  let mut decls = BTreeMap::new();
  for pair in table.pairs::<String, LuaValue>() {
    let (name, value) = pair?;
    if name == "self" {
      return Err(LuaError::external("'self' is reserved and cannot be declared as an input"));
    }
    let decl = match value {
      LuaValue::String(url) => InputDecl::Url(url.to_str()?.to_string()),
      LuaValue::Table(t) => InputDecl::Extended {
        url: t.get("url")?,
        inputs: parse_overrides(&name, t.get("inputs")?)?,
      },
      other => {
        return Err(LuaError::external(format!(
          "input '{name}' must be a url or a table, got {}",
          other.type_name()
        )));
      }
    };
    decls.insert(name, decl);
  }
  Ok(decls)
}

fn parse_overrides(parent: &str, value: LuaValue) -> LuaResult<BTreeMap<String, InputOverride>> {
  let table = match value {
    LuaValue::Nil => return Ok(BTreeMap::new()),
    LuaValue::Table(t) => t,
    _ => return Err(LuaError::external(format!("input '{parent}': 'inputs' must be a table"))),
  };

  let mut overrides = BTreeMap::new();
  for pair in table.pairs::<String, LuaValue>() {
    let (name, value) = pair?;
    let over = match value {
      LuaValue::String(url) => InputOverride::Url(url.to_str()?.to_string()),
      LuaValue::Table(t) => match (t.get::<Option<String>>("follows")?, t.get::<Option<String>>("url")?) {
        (Some(target), _) => InputOverride::Follows(target),
        (None, Some(url)) => InputOverride::Url(url),
        (None, None) => {
          return Err(LuaError::external(format!(
            "input '{parent}/{name}': override needs 'follows' or 'url'"
          )));
        }
      },
      _ => {
        return Err(LuaError::external(format!(
          "input '{parent}/{name}': override must be a url or a table"
        )));
      }
    };
    overrides.insert(name, over);
  }
  Ok(overrides)
}
