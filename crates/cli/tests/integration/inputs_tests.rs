use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn first_evaluation_writes_lock() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env.flint_cmd().arg("show").assert().success();

  let lock = std::fs::read_to_string(env.project_path().join("flint.lock")).unwrap();
  let lock: serde_json::Value = serde_json::from_str(&lock).unwrap();
  assert_eq!(lock["version"], 1);
  assert_eq!(lock["inputs"]["pkgs"]["type"], "path");
}

#[test]
fn lock_reports_inputs() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env
    .flint_cmd()
    .arg("lock")
    .assert()
    .success()
    .stdout(predicate::str::contains("pkgs"));
  assert!(env.project_path().join("flint.lock").is_file());
}

#[test]
fn lock_json_is_the_lock_file() {
  let env = TestEnv::with_index("smoke_flake.lua");
  let json = env.json(&["lock"]);
  assert_eq!(json["inputs"]["pkgs"]["rev"], "local");
}

#[test]
fn second_lock_is_up_to_date() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env.flint_cmd().arg("lock").assert().success();
  env
    .flint_cmd()
    .arg("lock")
    .assert()
    .success()
    .stdout(predicate::str::contains("up to date"));
}

#[test]
fn update_named_input() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env.flint_cmd().arg("lock").assert().success();
  env.flint_cmd().args(["update", "pkgs"]).assert().success();
}

#[test]
fn update_unknown_input_fails() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env
    .flint_cmd()
    .args(["update", "nixpkgs"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown input 'nixpkgs'"));
}

#[test]
fn missing_path_input_fails() {
  let env = TestEnv::from_fixture("smoke_flake.lua");
  env.flint_cmd().arg("lock").assert().failure();
}
