//! Input declarations and their resolved form.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Maximum nesting of transitive inputs and length of `follows` chains.
pub const MAX_FOLLOWS_DEPTH: usize = 10;

/// An input as written in a flake's `inputs` table.
///
/// ```lua
/// inputs = {
///   pkgs = "git:https://github.com/org/pkgs.git#v24.05",
///   rust_overlay = {
///     url = "github:org/rust-overlay",
///     inputs = { pkgs = { follows = "pkgs" } },
///   },
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDecl {
  Url(String),
  Extended {
    url: Option<String>,
    inputs: BTreeMap<String, InputOverride>,
  },
}

impl InputDecl {
  pub fn url(&self) -> Option<&str> {
    match self {
      InputDecl::Url(url) => Some(url),
      InputDecl::Extended { url, .. } => url.as_deref(),
    }
  }

  /// Overrides applied to this input's own inputs. `None` when there are none.
  pub fn overrides(&self) -> Option<&BTreeMap<String, InputOverride>> {
    match self {
      InputDecl::Extended { inputs, .. } if !inputs.is_empty() => Some(inputs),
      _ => None,
    }
  }
}

/// Replacement for one of an input's transitive inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOverride {
  /// Fetch the transitive input from a different URL.
  Url(String),
  /// Reuse another already-declared input, by path (`"pkgs"`, `"overlay/pkgs"`).
  Follows(String),
}

impl InputOverride {
  pub fn follows_path(&self) -> Option<&str> {
    match self {
      InputOverride::Follows(path) => Some(path),
      InputOverride::Url(_) => None,
    }
  }
}

/// A resolved input: where it lives locally and which revision it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
  pub path: PathBuf,
  /// Commit hash for git inputs, `"local"` for path inputs.
  pub rev: String,
  /// The input's own inputs, with `follows` already substituted.
  pub inputs: ResolvedInputs,
}

impl ResolvedInput {
  pub fn new(path: PathBuf, rev: String) -> Self {
    Self {
      path,
      rev,
      inputs: BTreeMap::new(),
    }
  }
}

pub type ResolvedInputs = BTreeMap<String, ResolvedInput>;

pub type InputDecls = BTreeMap<String, InputDecl>;
