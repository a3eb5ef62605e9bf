mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flint_lib::consts::FLAKE_FILENAME;
use flint_lib::platform::System;

use crate::cmd::Context;
use crate::output::{OutputFormat, print_error};

/// flint - reproducible builds, apps and dev shells from a Lua flake
#[derive(Parser)]
#[command(name = "flint")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  /// Path to the flake file
  #[arg(short, long, global = true, default_value = FLAKE_FILENAME)]
  file: PathBuf,

  /// Target system (e.g. aarch64-darwin). Defaults to the host.
  #[arg(long, global = true, value_parser = parse_system)]
  system: Option<System>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show the outputs of the flake for every system
  Show,

  /// Resolve inputs and write flint.lock, keeping existing pins
  Lock,

  /// Re-resolve inputs ignoring their pins and rewrite flint.lock
  Update {
    /// Inputs to update (all if not specified)
    inputs: Vec<String>,
  },

  /// Build a package or check
  Build {
    /// Output to build, e.g. `default`, `packages.engine` or `checks.build`
    #[arg(value_name = "OUTPUT", default_value = "default")]
    target: String,
  },

  /// Build an app and run it
  Run {
    /// App to run, e.g. `default` or `apps.server`
    #[arg(default_value = "default")]
    app: String,

    /// Arguments passed to the program
    #[arg(last = true)]
    args: Vec<String>,
  },

  /// Build every check of the target system
  Check,

  /// Enter a development shell
  Develop {
    /// Shell to enter
    #[arg(default_value = "default")]
    shell: String,

    /// Run a command in the shell instead of an interactive session
    #[arg(short, long)]
    command: Option<String>,

    /// Print the shell environment as export statements and exit
    #[arg(long, conflicts_with = "command")]
    print_env: bool,
  },

  /// Remove store entries not referenced by any gc root
  Gc {
    /// Show what would be removed without deleting anything
    #[arg(long)]
    dry_run: bool,
  },

  /// Show platform and storage locations
  Info,
}

fn parse_system(s: &str) -> Result<System, String> {
  s.parse()
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let ctx = Context {
    file: cli.file,
    system: cli.system,
    output: cli.output,
  };

  let result = match cli.command {
    Commands::Show => cmd::cmd_show(&ctx).map(|_| ExitCode::SUCCESS),
    Commands::Lock => cmd::cmd_lock(&ctx).map(|_| ExitCode::SUCCESS),
    Commands::Update { inputs } => cmd::cmd_update(&ctx, inputs).map(|_| ExitCode::SUCCESS),
    Commands::Build { target } => cmd::cmd_build(&ctx, &target),
    Commands::Run { app, args } => cmd::cmd_run(&ctx, &app, &args),
    Commands::Check => cmd::cmd_check(&ctx),
    Commands::Develop {
      shell,
      command,
      print_env,
    } => cmd::cmd_develop(&ctx, &shell, command.as_deref(), print_env),
    Commands::Gc { dry_run } => cmd::cmd_gc(&ctx, dry_run).map(|_| ExitCode::SUCCESS),
    Commands::Info => cmd::cmd_info(&ctx).map(|_| ExitCode::SUCCESS),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;

  #[test]
  fn command_definition_is_consistent() {
    Cli::command().debug_assert();
  }

  #[test]
  fn build_target_and_output_format_are_distinct() {
    let cli = Cli::try_parse_from(["flint", "build", "checks.build", "--output", "json"]).unwrap();
    assert!(cli.output.is_json());
    match cli.command {
      Commands::Build { target } => assert_eq!(target, "checks.build"),
      _ => panic!("expected build"),
    }
  }

  #[test]
  fn build_target_defaults_to_default() {
    let cli = Cli::try_parse_from(["flint", "build"]).unwrap();
    assert!(!cli.output.is_json());
    assert!(matches!(cli.command, Commands::Build { target } if target == "default"));
  }
}
