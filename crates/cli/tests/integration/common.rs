//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Systems every fixture flake is evaluated for.
pub const SYSTEMS: &[&str] = &["x86_64-linux", "aarch64-linux", "x86_64-darwin", "aarch64-darwin"];

pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own project directory plus private store, data and
/// cache paths.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Copy a fixture to `project/flake.lua`.
  pub fn from_fixture(name: &str) -> Self {
    let env = Self::empty();
    env.write_file("project/flake.lua", &fixture_content(name));
    env
  }

  /// A fixture flake plus a package index providing `maven` and `jdk` for every system.
  pub fn with_index(name: &str) -> Self {
    let env = Self::from_fixture(name);
    for system in SYSTEMS {
      for pkg in ["maven", "jdk"] {
        std::fs::create_dir_all(env.project_path().join("index").join(system).join(pkg).join("bin")).unwrap();
      }
    }
    env
  }

  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("project")).unwrap();
    Self { temp }
  }

  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn project_path(&self) -> PathBuf {
    self.dir("project")
  }

  pub fn store_path(&self) -> PathBuf {
    self.dir("store")
  }

  /// Data path for gc roots.
  pub fn data_path(&self) -> PathBuf {
    self.dir("data")
  }

  pub fn cache_path(&self) -> PathBuf {
    self.dir("cache")
  }

  pub fn roots_path(&self) -> PathBuf {
    self.data_path().join("roots")
  }

  /// Number of entries under `<store>/build`.
  pub fn store_builds(&self) -> usize {
    std::fs::read_dir(self.store_path().join("build"))
      .map(|d| d.count())
      .unwrap_or(0)
  }

  /// A `flint` command running in the project directory.
  ///
  /// Sets environment variables for isolated testing:
  /// - `FLINT_ROOT`: isolated data path (gc roots)
  /// - `FLINT_STORE`: isolated store
  /// - `XDG_CACHE_HOME` / `LOCALAPPDATA`: isolated input checkouts
  pub fn flint_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("flint");
    cmd.current_dir(self.project_path());
    cmd.env("FLINT_ROOT", self.data_path());
    cmd.env("FLINT_STORE", self.store_path());
    cmd.env("XDG_CACHE_HOME", self.cache_path());
    cmd.env("LOCALAPPDATA", self.cache_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Run `flint <args> -o json` and parse stdout.
  pub fn json(&self, args: &[&str]) -> serde_json::Value {
    let output = self.flint_cmd().args(args).args(["-o", "json"]).output().unwrap();
    assert!(
      output.status.success(),
      "flint {:?} failed: {}",
      args,
      String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
  }
}
