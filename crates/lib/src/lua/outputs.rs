//! Reading the table a flake's `outputs` function returns.
//!
//! ```lua
//! return {
//!   packages = { default = pkg },
//!   apps = { default = flake.app(pkg) },
//!   checks = { build = pkg },
//!   devShells = { default = flake.shell { ... } },
//! }
//! ```

use mlua::prelude::*;

use super::refs::build_from_lua;
use crate::flake::{App, DevShell, SystemOutputs};
use crate::manifest::Manifest;

const SECTIONS: &[&str] = &["packages", "apps", "checks", "devShells"];

pub fn parse_outputs(table: &LuaTable, manifest: &Manifest) -> LuaResult<SystemOutputs> {
  let mut outputs = SystemOutputs::default();

  for pair in table.pairs::<String, LuaValue>() {
    let (section, value) = pair?;
    if !SECTIONS.contains(&section.as_str()) {
      return Err(LuaError::external(format!(
        "unknown output '{section}' (expected one of: {})",
        SECTIONS.join(", ")
      )));
    }
    let LuaValue::Table(entries) = value else {
      return Err(LuaError::external(format!("output '{section}' must be a table")));
    };

    for entry in entries.pairs::<String, LuaValue>() {
      let (name, value) = entry?;
      let what = format!("{section}.{name}");
      match section.as_str() {
        "packages" => {
          outputs.packages.insert(name, build_from_lua(&value, manifest, &what)?);
        }
        "checks" => {
          outputs.checks.insert(name, build_from_lua(&value, manifest, &what)?);
        }
        "apps" => {
          outputs.apps.insert(name, app_from_lua(&value, &what)?);
        }
        _ => {
          outputs.dev_shells.insert(name, shell_from_lua(&value, &what)?);
        }
      }
    }
  }

  Ok(outputs)
}

fn app_from_lua(value: &LuaValue, what: &str) -> LuaResult<App> {
  match value {
    LuaValue::UserData(ud) => ud
      .borrow::<App>()
      .map(|app| (*app).clone())
      .map_err(|_| LuaError::external(format!("{what}: expected an app from flake.app()"))),
    other => Err(LuaError::external(format!(
      "{what}: expected an app from flake.app(), got {}",
      other.type_name()
    ))),
  }
}

fn shell_from_lua(value: &LuaValue, what: &str) -> LuaResult<DevShell> {
  match value {
    LuaValue::UserData(ud) => ud
      .borrow::<DevShell>()
      .map(|shell| (*shell).clone())
      .map_err(|_| LuaError::external(format!("{what}: expected a shell from flake.shell()"))),
    other => Err(LuaError::external(format!(
      "{what}: expected a shell from flake.shell(), got {}",
      other.type_name()
    ))),
  }
}
