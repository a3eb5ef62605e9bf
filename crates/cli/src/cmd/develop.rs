//! Implementation of the `flint develop` command.
//!
//! The shell's checks and interpreter envs are realized first, so entering
//! the shell also proves the project still builds.

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context as _, Result, bail};

use flint_lib::flake::OutputError;
use flint_lib::shell::ShellEnv;

use super::{Context, exit_code, lock_store, realize_builds, register_root, report_failures};
use crate::output::{print_json, print_step};

pub fn cmd_develop(ctx: &Context, name: &str, command: Option<&str>, print_env: bool) -> Result<ExitCode> {
  let (system, eval) = ctx.evaluate_target()?;
  if !system.is_host() {
    bail!("cannot enter a {} shell on this host", system);
  }
  let label = format!("devShells.{name}");
  let shell = eval
    .outputs
    .for_system(&system)?
    .dev_shells
    .get(name)
    .ok_or_else(|| OutputError::Missing {
      output: label.clone(),
      system: system.triple(),
    })?;

  let required = shell.required_builds();
  let env = {
    let _lock = lock_store("develop")?;
    if !required.is_empty() {
      print_step(&format!("Realizing {} build(s) for {}", required.len(), label));
    }
    let result = realize_builds(&eval, &required)?;
    if !result.is_success() {
      report_failures(&eval.manifest, &result);
      bail!("cannot enter {}: its builds failed", label);
    }
    if !required.is_empty() {
      register_root(&eval, &label, &required)?;
    }

    let index = eval.package_index();
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    ShellEnv::resolve(name, shell, &system, &eval.manifest, &result.realized, &index, &search_path)
      .with_context(|| format!("Failed to resolve {}", label))?
  };

  if print_env {
    if ctx.output.is_json() {
      let vars: BTreeMap<&str, String> = env
        .vars
        .iter()
        .map(|(k, v)| (k.as_str(), v.to_string_lossy().to_string()))
        .collect();
      print_json(&vars)?;
    } else {
      print!("{}", env.to_exports());
    }
    return Ok(ExitCode::SUCCESS);
  }

  let cwd = std::env::current_dir().context("Failed to read current directory")?;
  let status = env
    .command(command, &cwd)?
    .status()
    .with_context(|| format!("Failed to start {}", label))?;
  Ok(exit_code(status))
}
