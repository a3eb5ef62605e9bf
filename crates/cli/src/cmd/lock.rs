//! Implementation of the `flint lock` and `flint update` commands.
//!
//! `lock` resolves inputs that are not pinned yet and keeps existing pins.
//! `update` re-resolves the named inputs (or all of them) ignoring their pins.

use std::collections::BTreeSet;
use std::time::Instant;

use anyhow::{Context as _, Result, bail};
use owo_colors::{OwoColorize, Stream};

use flint_lib::eval::lock_flake;
use flint_lib::inputs::lock::{LOCK_FILENAME, LockFile};
use flint_lib::inputs::resolve::{ForceUpdate, ResolutionResult};
use flint_lib::lua::entrypoint::extract_input_decls;

use super::Context;
use crate::output::{format_duration, print_json, print_success, symbols};

pub fn cmd_lock(ctx: &Context) -> Result<()> {
  let previous = load_previous(ctx)?;
  let result = lock_flake(&ctx.file, &ForceUpdate::None).context("Failed to lock inputs")?;
  report(ctx, previous.as_ref(), &result)
}

pub fn cmd_update(ctx: &Context, inputs: Vec<String>) -> Result<()> {
  let start = Instant::now();

  let force = if inputs.is_empty() {
    ForceUpdate::All
  } else {
    let decls = extract_input_decls(&ctx.file)
      .with_context(|| format!("Failed to read inputs of {}", ctx.file.display()))?;
    if let Some(unknown) = inputs.iter().find(|name| !decls.contains_key(name.as_str())) {
      bail!("unknown input '{}'", unknown);
    }
    ForceUpdate::Only(inputs.into_iter().collect::<BTreeSet<_>>())
  };

  let previous = load_previous(ctx)?;
  let result = lock_flake(&ctx.file, &force).context("Failed to update inputs")?;
  report(ctx, previous.as_ref(), &result)?;

  if !ctx.output.is_json() {
    println!(
      "  {} Duration: {}",
      symbols::INFO,
      format_duration(start.elapsed()).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
  Ok(())
}

fn load_previous(ctx: &Context) -> Result<Option<LockFile>> {
  let path = ctx.flake_dir().join(LOCK_FILENAME);
  LockFile::load(&path).with_context(|| format!("Failed to read {}", path.display()))
}

fn report(ctx: &Context, previous: Option<&LockFile>, result: &ResolutionResult) -> Result<()> {
  if ctx.output.is_json() {
    return print_json(&result.lock_file);
  }

  for (name, input) in &result.lock_file.inputs {
    let new_rev = short(&input.rev);
    match previous.and_then(|p| p.inputs.get(name)) {
      Some(old) if old.rev == input.rev => {
        println!("  {} {}: {}", symbols::INFO, name, new_rev.if_supports_color(Stream::Stdout, |s| s.dimmed()));
      }
      Some(old) => println!(
        "  {} Updated {}: {} {} {}",
        symbols::SUCCESS,
        name.if_supports_color(Stream::Stdout, |s| s.cyan()),
        short(&old.rev),
        symbols::ARROW,
        new_rev.if_supports_color(Stream::Stdout, |s| s.green())
      ),
      None => println!(
        "  {} Added {}: {} ({})",
        symbols::SUCCESS,
        name.if_supports_color(Stream::Stdout, |s| s.cyan()),
        input.url,
        new_rev.if_supports_color(Stream::Stdout, |s| s.green())
      ),
    }
  }

  let lock_path = ctx.flake_dir().join(LOCK_FILENAME);
  if result.lock_changed {
    print_success(&format!("Lock file updated: {}", lock_path.display()));
  } else {
    print_success("All inputs are up to date.");
  }
  Ok(())
}

fn short(rev: &str) -> &str {
  &rev[..rev.len().min(8)]
}
