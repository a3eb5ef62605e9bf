//! Implementation of the `flint build` command.

use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Result, bail};

use flint_lib::flake::{OutputKind, OutputRef};

use super::{Context, lock_store, realize_builds, register_root, report_failures};
use crate::output::{format_duration, print_json, print_stat, print_success, truncate_hash};

/// Realize one package, app or check for the target system and root it.
///
/// Prints the store path of the result on success.
pub fn cmd_build(ctx: &Context, output: &str) -> Result<ExitCode> {
  let start = Instant::now();
  let (system, eval) = ctx.evaluate_target()?;
  let output = OutputRef::parse(output, OutputKind::Packages)?;
  let hash = eval.outputs.for_system(&system)?.build_for(&output, &system)?;

  let _lock = lock_store("build")?;
  let result = realize_builds(&eval, std::slice::from_ref(&hash))?;
  let Some(built) = result.realized.get(&hash) else {
    report_failures(&eval.manifest, &result);
    bail!("build of {} failed", output);
  };
  register_root(&eval, &output.to_string(), std::slice::from_ref(&hash))?;

  if ctx.output.is_json() {
    print_json(&serde_json::json!({
      "output": output.to_string(),
      "system": system,
      "hash": hash,
      "path": built.store_path,
      "cached": built.cached,
      "outputs": built.outputs,
    }))?;
  } else {
    let fresh = result.realized.values().filter(|r| !r.cached).count();
    print_success(&format!("Built {} for {}", output, system));
    print_stat("Path", &built.store_path.display().to_string());
    print_stat("Hash", truncate_hash(hash.as_str()));
    print_stat("Builds", &format!("{} realized, {} cached", fresh, result.realized.len() - fresh));
    print_stat("Duration", &format_duration(start.elapsed()));
  }
  Ok(ExitCode::SUCCESS)
}
