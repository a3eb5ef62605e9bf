use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn gc_with_no_store_succeeds() {
  let env = TestEnv::empty();

  env
    .flint_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn gc_dry_run_shows_what_would_be_removed() {
  let env = TestEnv::empty();

  env
    .flint_cmd()
    .args(["gc", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));
}

#[test]
fn gc_json_output_is_valid() {
  let env = TestEnv::empty();
  let json = env.json(&["gc"]);
  assert_eq!(json["stats"]["builds_deleted"], 0);
  assert!(json["deleted_paths"].as_array().unwrap().is_empty());
}

#[test]
fn gc_keeps_rooted_builds() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env.flint_cmd().args(["build", "smoke"]).assert().success();

  let json = env.json(&["gc"]);
  assert_eq!(json["stats"]["builds_deleted"], 0);
  assert_eq!(json["stats"]["roots_live"], 1);
  assert_eq!(env.store_builds(), 1);
}

#[test]
fn gc_removes_builds_of_deleted_projects() {
  let env = TestEnv::with_index("smoke_flake.lua");
  env.flint_cmd().args(["build", "smoke"]).assert().success();
  assert_eq!(env.store_builds(), 1);

  let dry = env.json(&["gc", "--dry-run"]);
  assert_eq!(dry["stats"]["builds_deleted"], 0);

  std::fs::remove_dir_all(env.project_path()).unwrap();
  std::fs::create_dir_all(env.temp.path().join("project")).unwrap();
  // project/flake.lua no longer exists, so its root is stale
  let json = env.json(&["gc"]);
  assert_eq!(json["stats"]["roots_removed"], 1);
  assert_eq!(json["stats"]["builds_deleted"], 1);
  assert_eq!(env.store_builds(), 0);
}
