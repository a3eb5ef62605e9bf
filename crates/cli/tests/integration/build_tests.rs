use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn build_package_prints_store_path() {
  let env = TestEnv::with_index("smoke_flake.lua");

  env
    .flint_cmd()
    .args(["build", "smoke"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Built packages.smoke"))
    .stdout(predicate::str::contains(env.store_path().to_string_lossy().to_string()));

  assert_eq!(env.store_builds(), 1);
}

#[test]
fn second_build_is_cached() {
  let env = TestEnv::with_index("smoke_flake.lua");

  let first = env.json(&["build", "packages.smoke"]);
  let second = env.json(&["build", "packages.smoke"]);

  assert_eq!(first["cached"], false);
  assert_eq!(second["cached"], true);
  assert_eq!(first["path"], second["path"]);
  let path = std::path::PathBuf::from(second["path"].as_str().unwrap());
  assert_eq!(std::fs::read_to_string(path.join("result")).unwrap().trim(), "ok");
}

#[test]
fn package_and_check_share_a_store_entry() {
  let env = TestEnv::with_index("smoke_flake.lua");

  let package = env.json(&["build", "packages.smoke"]);
  let check = env.json(&["build", "checks.smoke"]);

  assert_eq!(package["hash"], check["hash"]);
  assert_eq!(check["cached"], true);
  assert_eq!(env.store_builds(), 1);
}

#[test]
fn build_records_gc_root() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env.flint_cmd().args(["build", "smoke"]).assert().success();

  let roots: Vec<_> = std::fs::read_dir(env.roots_path()).unwrap().collect();
  assert_eq!(roots.len(), 1);
}

#[test]
fn missing_output_fails() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env
    .flint_cmd()
    .args(["build", "packages.ghost"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no output packages.ghost"));
}

#[test]
fn invalid_output_reference_fails() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env
    .flint_cmd()
    .args(["build", "pakages.smoke"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("invalid output reference"));
}

#[test]
fn check_passes() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env
    .flint_cmd()
    .arg("check")
    .assert()
    .success()
    .stdout(predicate::str::contains("checks.smoke"))
    .stdout(predicate::str::contains("passed"));
}

#[test]
fn failing_check_fails_command_but_keeps_others() {
  let env = TestEnv::from_fixture("failing_check.lua");

  env
    .flint_cmd()
    .arg("check")
    .assert()
    .failure()
    .stdout(predicate::str::contains("checks.broken failed"))
    .stderr(predicate::str::contains("1 of 2 check(s) failed"));

  assert_eq!(env.store_builds(), 1);
}

#[test]
fn check_json_reports_each_check() {
  let env = TestEnv::from_fixture("failing_check.lua");
  let output = env.flint_cmd().args(["check", "-o", "json"]).output().unwrap();
  assert!(!output.status.success());

  let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let statuses: Vec<(&str, &str)> = reports
    .as_array()
    .unwrap()
    .iter()
    .map(|r| (r["name"].as_str().unwrap(), r["status"].as_str().unwrap()))
    .collect();
  assert_eq!(statuses, vec![("broken", "failed"), ("good", "passed")]);
}

#[test]
fn run_missing_app_fails() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env
    .flint_cmd()
    .arg("run")
    .assert()
    .failure()
    .stderr(predicate::str::contains("apps.default"));
}
