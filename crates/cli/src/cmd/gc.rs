use std::time::Instant;

use anyhow::{Context as _, Result};

use flint_lib::gc::collect_garbage;
use flint_lib::platform::paths::{roots_dir, store_dir};
use flint_lib::store_lock::{LockMode, StoreLock};

use super::Context;
use crate::output::{format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(ctx: &Context, dry_run: bool) -> Result<()> {
  let start = Instant::now();

  let _lock = StoreLock::acquire(LockMode::Exclusive, "gc").context("Failed to acquire store lock")?;

  let result = collect_garbage(&store_dir(), &roots_dir(), dry_run).context("Garbage collection failed")?;

  if ctx.output.is_json() {
    print_json(&result)?;
  } else {
    println!();
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Builds scanned", &result.stats.builds_scanned.to_string());
    print_stat("Builds removed", &result.stats.builds_deleted.to_string());
    print_stat("Live roots", &result.stats.roots_live.to_string());
    print_stat("Stale roots removed", &result.stats.roots_removed.to_string());
    print_stat("Space freed", &format_bytes(result.stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
