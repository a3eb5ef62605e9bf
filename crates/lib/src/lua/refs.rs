//! Values crossing the Lua boundary.
//!
//! Builds are handed to Lua as plain tables tagged with a `__type = "build"`
//! metatable, so flake code can read `pkg.outputs.bin` or `pkg.hash` like any
//! other table. Toolchains, sources, apps and dev shells are userdata: flake
//! code can inspect them but not forge them.

use mlua::prelude::*;

use crate::build::BuildDef;
use crate::build::source::SourceTree;
use crate::flake::{App, DevShell, ShellPackage};
use crate::manifest::Manifest;
use crate::toolchain::ToolchainSpec;
use crate::util::hash::ObjectHash;

pub const BUILD_REF_TYPE: &str = "build";

impl LuaUserData for ToolchainSpec {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("channel", |_, this| Ok(this.channel.clone()));
    fields.add_field_method_get("components", |_, this| Ok(this.components.clone()));
    fields.add_field_method_get("targets", |_, this| Ok(this.targets.clone()));
  }
}

impl LuaUserData for SourceTree {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("path", |_, this| Ok(this.root.to_string_lossy().to_string()));
    fields.add_field_method_get("name", |_, this| Ok(this.name.clone()));
    fields.add_field_method_get("version", |_, this| Ok(this.version.clone()));
    fields.add_field_method_get("hash", |_, this| Ok(this.hash.0.clone()));
    fields.add_field_method_get("deps_hash", |_, this| Ok(this.deps_hash.0.clone()));
    fields.add_field_method_get("bins", |_, this| Ok(this.bins.clone()));
  }
}

impl LuaUserData for App {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("type", |_, this| Ok(this.kind.clone()));
    fields.add_field_method_get("package", |_, this| Ok(this.package.0.clone()));
    fields.add_field_method_get("program", |_, this| Ok(this.program.clone()));
  }
}

impl LuaUserData for DevShell {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("checks", |_, this| {
      Ok(this.checks.iter().map(|h| h.0.clone()).collect::<Vec<_>>())
    });
    fields.add_field_method_get("packages", |_, this| {
      Ok(
        this
          .packages
          .iter()
          .map(|p| match p {
            ShellPackage::Index(name) => name.clone(),
            ShellPackage::Build(hash) => hash.0.clone(),
          })
          .collect::<Vec<_>>(),
      )
    });
  }
}

/// The Lua view of a registered build.
pub fn build_to_lua(lua: &Lua, hash: &ObjectHash, def: &BuildDef) -> LuaResult<LuaTable> {
  let table = lua.create_table()?;
  table.set("hash", hash.as_str())?;
  table.set("name", def.name.as_str())?;
  if let Some(version) = &def.version {
    table.set("version", version.as_str())?;
  }
  table.set("kind", def.kind.label())?;
  table.set("system", def.system.triple())?;
  if let Some(program) = &def.main_program {
    table.set("main_program", program.as_str())?;
  }

  let outputs = lua.create_table()?;
  outputs.set("out", format!("$${{build:{}:out}}", hash))?;
  for name in def.outputs.keys() {
    outputs.set(name.as_str(), format!("$${{build:{}:{}}}", hash, name))?;
  }
  table.set("outputs", outputs)?;

  let mt = lua.create_table()?;
  mt.set("__type", BUILD_REF_TYPE)?;
  table.set_metatable(Some(mt))?;
  Ok(table)
}

pub fn is_build_ref(value: &LuaValue) -> bool {
  match value {
    LuaValue::Table(t) => t
      .metatable()
      .and_then(|mt| mt.get::<String>("__type").ok())
      .is_some_and(|ty| ty == BUILD_REF_TYPE),
    _ => false,
  }
}

/// The hash behind a build reference, checked against the manifest.
pub fn build_from_lua(value: &LuaValue, manifest: &Manifest, what: &str) -> LuaResult<ObjectHash> {
  let LuaValue::Table(table) = value else {
    return Err(LuaError::external(format!(
      "{what}: expected a build, got {}",
      value.type_name()
    )));
  };
  if !is_build_ref(value) {
    return Err(LuaError::external(format!("{what}: expected a build, got a plain table")));
  }
  let hash = ObjectHash(table.get::<String>("hash")?);
  if manifest.get(&hash).is_none() {
    return Err(LuaError::external(format!("{what}: build {hash} is not registered")));
  }
  Ok(hash)
}

pub fn toolchain_from_lua(value: &LuaValue, what: &str) -> LuaResult<ToolchainSpec> {
  match value {
    LuaValue::UserData(ud) => ud
      .borrow::<ToolchainSpec>()
      .map(|tc| (*tc).clone())
      .map_err(|_| LuaError::external(format!("{what}: expected a toolchain"))),
    other => Err(LuaError::external(format!(
      "{what}: expected a toolchain, got {}",
      other.type_name()
    ))),
  }
}

pub fn source_from_lua(value: &LuaValue, what: &str) -> LuaResult<SourceTree> {
  match value {
    LuaValue::UserData(ud) => ud
      .borrow::<SourceTree>()
      .map(|src| (*src).clone())
      .map_err(|_| LuaError::external(format!("{what}: expected a source from flake.source()"))),
    other => Err(LuaError::external(format!(
      "{what}: expected a source from flake.source(), got {}",
      other.type_name()
    ))),
  }
}

/// Strings from either a sequence or the values of a map, in order.
pub fn string_list(value: LuaValue, what: &str) -> LuaResult<Vec<String>> {
  match value {
    LuaValue::Nil => Ok(Vec::new()),
    LuaValue::Table(t) => t
      .sequence_values::<String>()
      .map(|v| v.map_err(|_| LuaError::external(format!("{what}: expected a list of strings"))))
      .collect(),
    other => Err(LuaError::external(format!(
      "{what}: expected a list of strings, got {}",
      other.type_name()
    ))),
  }
}

/// Values of a table, sequence part first, then keyed entries sorted by key.
pub fn table_values(table: &LuaTable) -> LuaResult<Vec<LuaValue>> {
  let mut values: Vec<LuaValue> = table.sequence_values::<LuaValue>().collect::<LuaResult<_>>()?;
  let len = values.len() as i64;
  let mut keyed = Vec::new();
  for pair in table.pairs::<LuaValue, LuaValue>() {
    let (key, value) = pair?;
    match key {
      LuaValue::Integer(i) if i >= 1 && i <= len => {}
      LuaValue::String(s) => keyed.push((s.to_str()?.to_string(), value)),
      other => keyed.push((format!("{other:?}"), value)),
    }
  }
  keyed.sort_by(|a, b| a.0.cmp(&b.0));
  values.extend(keyed.into_iter().map(|(_, v)| v));
  Ok(values)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::BuildKind;

  fn registered() -> (Manifest, ObjectHash, BuildDef) {
    let mut manifest = Manifest::default();
    let mut def = BuildDef::new("engine", BuildKind::CargoPackage, "x86_64-linux".parse().unwrap());
    def.outputs.insert("bin".to_string(), "$${out}/bin".to_string());
    let hash = manifest.register(def.clone()).unwrap();
    (manifest, hash, def)
  }

  #[test]
  fn build_ref_round_trips_through_lua() -> LuaResult<()> {
    let lua = Lua::new();
    let (manifest, hash, def) = registered();
    let table = build_to_lua(&lua, &hash, &def)?;

    let bin: String = table.get::<LuaTable>("outputs")?.get("bin")?;
    assert_eq!(bin, format!("$${{build:{}:bin}}", hash));
    assert_eq!(table.get::<String>("kind")?, "cargo-package");

    let back = build_from_lua(&LuaValue::Table(table), &manifest, "test")?;
    assert_eq!(back, hash);
    Ok(())
  }

  #[test]
  fn plain_table_is_not_a_build() -> LuaResult<()> {
    let lua = Lua::new();
    let (manifest, hash, _) = registered();
    let forged = lua.create_table()?;
    forged.set("hash", hash.as_str())?;

    let err = build_from_lua(&LuaValue::Table(forged), &manifest, "apps.default").unwrap_err();
    assert!(err.to_string().contains("apps.default: expected a build"));
    Ok(())
  }

  #[test]
  fn unregistered_hash_is_rejected() -> LuaResult<()> {
    let lua = Lua::new();
    let (_, hash, def) = registered();
    let table = build_to_lua(&lua, &hash, &def)?;
    let err = build_from_lua(&LuaValue::Table(table), &Manifest::default(), "pkg").unwrap_err();
    assert!(err.to_string().contains("not registered"));
    Ok(())
  }

  #[test]
  fn table_values_orders_sequence_then_keys() -> LuaResult<()> {
    let lua = Lua::new();
    let t: LuaTable = lua.load(r#"return { "a", "b", z = "z", m = "m" }"#).eval()?;
    let values: Vec<String> = table_values(&t)?
      .into_iter()
      .map(|v| v.as_string().unwrap().to_str().unwrap().to_string())
      .collect();
    assert_eq!(values, vec!["a", "b", "m", "z"]);
    Ok(())
  }
}
