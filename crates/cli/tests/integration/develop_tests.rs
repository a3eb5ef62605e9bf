use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn print_env_exports_shell_paths() {
  let env = TestEnv::with_index("smoke_flake.lua");

  env
    .flint_cmd()
    .args(["develop", "--print-env"])
    .assert()
    .success()
    .stdout(predicate::str::contains("export FLINT_SHELL='default'"))
    .stdout(predicate::str::contains("maven"))
    .stdout(predicate::str::contains("JAVA_HOME"));
}

#[test]
fn develop_realizes_checks_first() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env.flint_cmd().args(["develop", "--print-env"]).assert().success();
  assert_eq!(env.store_builds(), 1);
}

#[test]
fn print_env_json() {
  let env = TestEnv::with_index("smoke_flake.lua");
  let vars = env.json(&["develop", "--print-env"]);
  assert_eq!(vars["FLINT_SHELL"], "default");
  assert!(vars["PATH"].as_str().unwrap().contains("jdk"));
}

#[test]
#[cfg(unix)]
fn command_runs_inside_shell() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env
    .flint_cmd()
    .args(["develop", "--command", "echo shell=$FLINT_SHELL"])
    .assert()
    .success()
    .stdout(predicate::str::contains("shell=default"));
}

#[test]
#[cfg(unix)]
fn command_exit_status_is_propagated() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env
    .flint_cmd()
    .args(["develop", "--command", "exit 7"])
    .assert()
    .code(7);
}

#[test]
fn unknown_shell_fails() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env
    .flint_cmd()
    .args(["develop", "ghost", "--print-env"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("devShells.ghost"));
}
