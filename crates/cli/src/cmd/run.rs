//! Implementation of the `flint run` command.

use std::process::{Command, ExitCode};

use anyhow::{Context as _, Result, bail};

use flint_lib::flake::{OutputError, OutputKind, OutputRef};

use super::{Context, exit_code, lock_store, program_path, realize_builds, register_root, report_failures};
use crate::output::print_step;

/// Build an app (or a package's main program) and run it with `args`.
///
/// The exit status of the program becomes the exit status of flint.
pub fn cmd_run(ctx: &Context, app: &str, args: &[String]) -> Result<ExitCode> {
  let (system, eval) = ctx.evaluate_target()?;
  if !system.is_host() {
    bail!("cannot run a {} program on this host", system);
  }
  let output = OutputRef::parse(app, OutputKind::Apps)?;
  let outputs = eval.outputs.for_system(&system)?;

  let (hash, program) = match output.kind {
    OutputKind::Apps => {
      let app = outputs.apps.get(&output.name).ok_or_else(|| OutputError::Missing {
        output: output.to_string(),
        system: system.triple(),
      })?;
      (app.package.clone(), app.program.clone())
    }
    OutputKind::Packages => {
      let hash = outputs.build_for(&output, &system)?;
      let program = eval
        .manifest
        .get(&hash)
        .and_then(|d| d.main_program.clone())
        .with_context(|| format!("{} has no main program", output))?;
      (hash, format!("bin/{program}"))
    }
    OutputKind::Checks | OutputKind::DevShells => bail!("{} is not runnable", output),
  };

  let store_path = {
    let _lock = lock_store("run")?;
    let result = realize_builds(&eval, std::slice::from_ref(&hash))?;
    let Some(built) = result.realized.get(&hash) else {
      report_failures(&eval.manifest, &result);
      bail!("build of {} failed", output);
    };
    register_root(&eval, &output.to_string(), std::slice::from_ref(&hash))?;
    built.store_path.clone()
  };

  let exe = program_path(&store_path, &program);
  print_step(&format!("Running {}", exe.display()));
  let status = Command::new(&exe)
    .args(args)
    .status()
    .with_context(|| format!("Failed to run {}", exe.display()))?;
  Ok(exit_code(status))
}
