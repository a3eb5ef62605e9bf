pub mod arch;
pub mod link_inputs;
pub mod os;
pub mod paths;

use arch::Arch;
use os::Os;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub use link_inputs::PlatformInputs;

/// Systems a flake is evaluated for when the caller does not narrow the set.
pub const DEFAULT_SYSTEMS: &[&str] = &["x86_64-linux", "aarch64-linux", "x86_64-darwin", "aarch64-darwin"];

/// Platform identifier combining architecture and OS (e.g., "aarch64-darwin")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct System {
  pub arch: Arch,
  pub os: Os,
}

impl System {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// Returns the platform triple string (e.g., "aarch64-darwin")
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }

  /// The rustc target triple used to name rustup toolchain directories.
  pub fn rust_target(&self) -> String {
    let suffix = match self.os {
      Os::Linux => "unknown-linux-gnu",
      Os::MacOs => "apple-darwin",
      Os::Windows => "pc-windows-msvc",
    };
    format!("{}-{}", self.arch, suffix)
  }

  /// Whether this system is the one flint is running on.
  pub fn is_host(&self) -> bool {
    Self::current().as_ref() == Some(self)
  }

  /// All default systems, parsed.
  pub fn defaults() -> Vec<System> {
    DEFAULT_SYSTEMS.iter().filter_map(|s| s.parse().ok()).collect()
  }
}

impl fmt::Display for System {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

impl FromStr for System {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (arch, os) = s
      .split_once('-')
      .ok_or_else(|| format!("invalid system '{}': expected <arch>-<os>", s))?;
    Ok(Self {
      arch: arch.parse()?,
      os: os.parse()?,
    })
  }
}

impl Serialize for System {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.triple())
  }
}

impl<'de> Deserialize<'de> for System {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// Returns the platform triple for the current system (e.g., "aarch64-darwin")
///
/// Returns `None` if the current platform is not supported
pub fn platform_triple() -> Option<String> {
  System::current().map(|p| p.triple())
}
