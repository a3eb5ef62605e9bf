//! Shell commands in the build sandbox.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::BUILD_TMP_DIR;
use crate::execute::env::BuildEnv;
use crate::execute::types::ExecuteError;

/// Lines of stderr kept in a failure.
const STDERR_TAIL: usize = 40;

/// Run `cmd` with a cleared environment.
///
/// The command sees `HOME=/homeless-shelter`, temp variables pointing into
/// `<out>/tmp`, `out`, a C locale, `SOURCE_DATE_EPOCH` pinned to 1980-01-01
/// and whatever `build_env` and `env` add. Without tools `PATH` is
/// `/path-not-set`. Returns trimmed stdout.
pub async fn execute_cmd(
  cmd: &str,
  env: &BTreeMap<String, String>,
  cwd: Option<&str>,
  out_dir: &Path,
  build_env: &BuildEnv,
) -> Result<String, ExecuteError> {
  info!(cmd = %cmd, "running command");

  let tmp_dir = out_dir.join(BUILD_TMP_DIR);
  tokio::fs::create_dir_all(&tmp_dir).await?;

  let (shell, args) = shell();
  let working_dir = cwd.map(Path::new).unwrap_or(out_dir);

  let mut command = Command::new(shell);
  command
    .args(args)
    .arg(cmd)
    .current_dir(working_dir)
    .env_clear()
    .env("PATH", "/path-not-set")
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", &tmp_dir)
    .env("TMP", &tmp_dir)
    .env("TEMP", &tmp_dir)
    .env("TEMPDIR", &tmp_dir)
    .env("out", out_dir)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", "315532800");

  #[cfg(windows)]
  if let Some(root) = std::env::var_os("SystemRoot") {
    command.env("SystemRoot", root);
  }

  command.envs(&build_env.vars);
  command.envs(env);

  debug!(shell, working_dir = %working_dir.display(), "spawning");
  let output = command.output().await?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }
    return Err(ExecuteError::CmdFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      stderr: tail(&stderr, STDERR_TAIL),
    });
  }

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }
  Ok(stdout)
}

fn tail(text: &str, lines: usize) -> String {
  let all: Vec<&str> = text.trim_end().lines().collect();
  all[all.len().saturating_sub(lines)..].join("\n")
}

/// `/bin/sh -c` rather than `$SHELL`, whose profile could leak host state.
#[cfg(unix)]
fn shell() -> (&'static str, &'static [&'static str]) {
  ("/bin/sh", &["-c"])
}

#[cfg(windows)]
fn shell() -> (&'static str, &'static [&'static str]) {
  ("powershell.exe", &["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command"])
}
