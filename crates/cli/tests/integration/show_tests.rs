use predicates::prelude::*;

use super::common::{SYSTEMS, TestEnv};

#[test]
fn show_lists_outputs_for_every_system() {
  let env = TestEnv::with_index("smoke_flake.lua");

  let mut assert = env.flint_cmd().arg("show").assert().success();
  for system in SYSTEMS {
    assert = assert.stdout(predicate::str::contains(*system));
  }
  assert
    .stdout(predicate::str::contains("smoke project"))
    .stdout(predicate::str::contains("checks.smoke"))
    .stdout(predicate::str::contains("maven, jdk"));
}

#[test]
fn show_json_has_output_tree() {
  let env = TestEnv::with_index("smoke_flake.lua");
  let json = env.json(&["show"]);

  let systems = json["systems"].as_object().unwrap();
  assert_eq!(systems.len(), 4);
  for outputs in systems.values() {
    assert_eq!(outputs["packages"]["smoke"], outputs["checks"]["smoke"]);
    let shell = &outputs["devShells"]["default"];
    assert_eq!(shell["checks"][0], outputs["checks"]["smoke"]);
    assert_eq!(shell["packages"][0]["value"], "maven");
  }
}

#[test]
fn show_respects_system_flag() {
  let env = TestEnv::with_index("smoke_flake.lua");
  let json = env.json(&["--system", "aarch64-darwin", "show"]);
  let systems: Vec<&String> = json["systems"].as_object().unwrap().keys().collect();
  assert_eq!(systems, vec!["aarch64-darwin"]);
}

#[test]
fn mistyped_output_section_fails() {
  let env = TestEnv::from_fixture("mistyped_output.lua");
  env
    .flint_cmd()
    .arg("show")
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown output 'package'"));
}

#[test]
fn file_flag_selects_flake() {
  let env = TestEnv::with_index("smoke_flake.lua");
  let other = env.temp.path().join("elsewhere");
  std::fs::create_dir_all(&other).unwrap();

  env
    .flint_cmd()
    .current_dir(&other)
    .args(["--file", env.project_path().join("flake.lua").to_str().unwrap(), "show"])
    .assert()
    .success()
    .stdout(predicate::str::contains("smoke project"));
}
