//! Test helpers shared across modules.

use std::collections::BTreeMap;

use crate::build::{BuildAction, BuildDef, BuildKind};
use crate::platform::System;

/// A shell snippet printing an environment variable.
#[cfg(unix)]
pub fn echo_env(var: &str) -> String {
  format!("echo \"${}\"", var)
}

#[cfg(windows)]
pub fn echo_env(var: &str) -> String {
  format!("Write-Output $env:{}", var)
}

/// A single-command build for the host system.
pub fn cmd_build(name: &str, cmd: &str) -> BuildDef {
  let mut def = BuildDef::new(name, BuildKind::Generic, System::current().expect("supported host"));
  def.actions.push(BuildAction::Cmd {
    cmd: cmd.to_string(),
    env: BTreeMap::new(),
    cwd: None,
  });
  def
}
