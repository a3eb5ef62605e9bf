//! Implementation of the `flint check` command.

use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;

use flint_lib::util::hash::ObjectHash;

use super::{Context, lock_store, realize_builds, register_root};
use crate::output::{BuildStatus, print_error, print_info, print_json, print_status, print_success};

#[derive(Serialize)]
struct CheckReport {
  name: String,
  hash: ObjectHash,
  status: BuildStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<String>,
}

/// Realize every check of the target system. Any failure fails the command.
pub fn cmd_check(ctx: &Context) -> Result<ExitCode> {
  let (system, eval) = ctx.evaluate_target()?;
  let checks = &eval.outputs.for_system(&system)?.checks;

  if checks.is_empty() {
    if ctx.output.is_json() {
      print_json(&Vec::<CheckReport>::new())?;
    } else {
      print_info(&format!("No checks defined for {}", system));
    }
    return Ok(ExitCode::SUCCESS);
  }

  let mut hashes: Vec<ObjectHash> = checks.values().cloned().collect();
  hashes.sort();
  hashes.dedup();

  let _lock = lock_store("check")?;
  let result = realize_builds(&eval, &hashes)?;

  let reports: Vec<CheckReport> = checks
    .iter()
    .map(|(name, hash)| {
      let (status, error) = if result.realized.contains_key(hash) {
        (BuildStatus::Passed, None)
      } else if let Some((_, err)) = result.failed.iter().find(|(h, _)| h == hash) {
        (BuildStatus::Failed, Some(err.to_string()))
      } else {
        let cause = result
          .skipped
          .get(hash)
          .and_then(|c| eval.manifest.get(c))
          .map(|d| format!("dependency {} failed", d.display_name()));
        (BuildStatus::Skipped, cause)
      };
      CheckReport {
        name: name.clone(),
        hash: hash.clone(),
        status,
        error,
      }
    })
    .collect();

  let passed: Vec<ObjectHash> = hashes
    .iter()
    .filter(|h| result.realized.contains_key(*h))
    .cloned()
    .collect();
  if !passed.is_empty() {
    register_root(&eval, "checks", &passed)?;
  }

  let failures = reports.iter().filter(|r| r.status != BuildStatus::Passed).count();
  if ctx.output.is_json() {
    print_json(&reports)?;
  } else {
    for report in &reports {
      print_status(report.status, &format!("checks.{}", report.name), report.error.as_deref());
    }
    if failures == 0 {
      print_success(&format!("All {} check(s) passed on {}", reports.len(), system));
    } else {
      print_error(&format!("{} of {} check(s) failed on {}", failures, reports.len(), system));
    }
  }

  Ok(if failures == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
