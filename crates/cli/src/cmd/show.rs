//! Implementation of the `flint show` command.

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use flint_lib::eval::EvalOptions;
use flint_lib::flake::{DevShell, ShellPackage, SystemOutputs};
use flint_lib::manifest::Manifest;
use flint_lib::util::hash::ObjectHash;

use super::Context;
use crate::output::{print_json, truncate_hash};

/// Print the output tree. Without `--system` every supported system is evaluated.
pub fn cmd_show(ctx: &Context) -> Result<()> {
  let opts = EvalOptions {
    systems: ctx.system.map(|s| vec![s]),
    ..EvalOptions::default()
  };
  let eval = ctx.evaluate(&opts)?;

  if ctx.output.is_json() {
    return print_json(&eval.outputs);
  }

  if let Some(description) = &eval.outputs.description {
    println!("{}", description.if_supports_color(Stream::Stdout, |s| s.bold()));
  }
  for (system, outputs) in &eval.outputs.systems {
    println!("{}", system.if_supports_color(Stream::Stdout, |s| s.cyan()));
    print_system(outputs, &eval.manifest);
  }
  Ok(())
}

fn print_system(outputs: &SystemOutputs, manifest: &Manifest) {
  for (name, hash) in &outputs.packages {
    entry("packages", name, &describe(manifest, hash));
  }
  for (name, app) in &outputs.apps {
    entry("apps", name, &format!("{} in {}", app.program, describe(manifest, &app.package)));
  }
  for (name, hash) in &outputs.checks {
    entry("checks", name, &describe(manifest, hash));
  }
  for (name, shell) in &outputs.dev_shells {
    entry("devShells", name, &shell_contents(shell, manifest));
  }
}

fn entry(kind: &str, name: &str, detail: &str) {
  println!(
    "  {}.{} {}",
    kind,
    name.if_supports_color(Stream::Stdout, |s| s.bold()),
    detail.if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

fn describe(manifest: &Manifest, hash: &ObjectHash) -> String {
  match manifest.get(hash) {
    Some(def) => format!("{} ({})", def.display_name(), truncate_hash(hash.as_str())),
    None => truncate_hash(hash.as_str()).to_string(),
  }
}

fn shell_contents(shell: &DevShell, manifest: &Manifest) -> String {
  let mut parts = Vec::new();
  if let Some(toolchain) = &shell.toolchain {
    parts.push(format!("rust {}", toolchain.channel));
  }
  for pkg in &shell.packages {
    match pkg {
      ShellPackage::Index(name) => parts.push(name.clone()),
      ShellPackage::Build(hash) => parts.push(
        manifest
          .get(hash)
          .map(|d| d.display_name())
          .unwrap_or_else(|| hash.to_string()),
      ),
    }
  }
  if !shell.checks.is_empty() {
    parts.push(format!("{} check(s)", shell.checks.len()));
  }
  format!("[{}]", parts.join(", "))
}
