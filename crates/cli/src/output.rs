//! Terminal and JSON output for flint commands.
//!
//! Human output is colored when the stream supports it. Anything a script
//! might parse goes to stdout; progress and diagnostics go to stderr.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const SKIPPED: &str = "-";
}

/// Outcome of one build in a realization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
  Passed,
  Failed,
  /// Not attempted because a dependency failed.
  Skipped,
}

impl BuildStatus {
  pub fn symbol(self) -> &'static str {
    match self {
      BuildStatus::Passed => symbols::SUCCESS,
      BuildStatus::Failed => symbols::ERROR,
      BuildStatus::Skipped => symbols::SKIPPED,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      BuildStatus::Passed => "passed",
      BuildStatus::Failed => "failed",
      BuildStatus::Skipped => "skipped",
    }
  }
}

/// An indented `<symbol> <label>[ <status>: <detail>]` line on stdout.
pub fn print_status(status: BuildStatus, label: &str, detail: Option<&str>) {
  let symbol = status.symbol();
  let symbol = match status {
    BuildStatus::Passed => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    BuildStatus::Failed => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    BuildStatus::Skipped => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
  };
  match (status, detail) {
    (BuildStatus::Passed, _) => println!("  {} {}", symbol, label),
    (_, detail) => println!("  {} {} {}: {}", symbol, label, status.as_str(), detail.unwrap_or("unknown error")),
  }
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_bytes(bytes: u64) -> String {
  const KB: u64 = 1024;
  const MB: u64 = KB * 1024;
  const GB: u64 = MB * 1024;

  if bytes >= GB {
    format!("{:.1} GB", bytes as f64 / GB as f64)
  } else if bytes >= MB {
    format!("{:.1} MB", bytes as f64 / MB as f64)
  } else if bytes >= KB {
    format!("{:.1} KB", bytes as f64 / KB as f64)
  } else {
    format!("{} B", bytes)
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

/// A build that never ran because something it depends on failed.
pub fn print_skipped(message: &str) {
  eprintln!(
    "{} {}",
    symbols::SKIPPED.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

/// Progress lines go to stderr so stdout stays parseable.
pub fn print_step(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ARROW.if_supports_color(Stream::Stderr, |s| s.cyan()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
