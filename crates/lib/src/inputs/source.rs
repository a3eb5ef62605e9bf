//! Input URL parsing.
//!
//! Supported forms:
//!
//! - `git:<url>` or `git:<url>#<rev>`
//! - `github:<owner>/<repo>` or `github:<owner>/<repo>/<rev>`
//! - `path:<dir>` (absolute, relative to the flake, or `~/`-prefixed)

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
  Git { url: String, rev: Option<String> },
  Path { path: PathBuf },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("unknown input scheme in '{0}' (expected git:, github: or path:)")]
  UnknownScheme(String),

  #[error("empty {scheme} input URL")]
  Empty { scheme: &'static str },

  #[error("invalid github reference '{0}' (expected owner/repo[/rev])")]
  InvalidGithub(String),
}

pub fn parse(url: &str) -> Result<InputSource, ParseError> {
  if let Some(rest) = url.strip_prefix("git:") {
    let (repo, rev) = match rest.rsplit_once('#') {
      Some((repo, rev)) if !rev.is_empty() => (repo, Some(rev.to_string())),
      Some((repo, _)) => (repo, None),
      None => (rest, None),
    };
    if repo.is_empty() {
      return Err(ParseError::Empty { scheme: "git" });
    }
    return Ok(InputSource::Git {
      url: repo.to_string(),
      rev,
    });
  }

  if let Some(rest) = url.strip_prefix("github:") {
    let parts: Vec<&str> = rest.split('/').collect();
    let (owner, repo, rev) = match parts.as_slice() {
      [owner, repo] => (*owner, *repo, None),
      [owner, repo, rev] => (*owner, *repo, Some(rev.to_string())),
      _ => return Err(ParseError::InvalidGithub(rest.to_string())),
    };
    if owner.is_empty() || repo.is_empty() {
      return Err(ParseError::InvalidGithub(rest.to_string()));
    }
    return Ok(InputSource::Git {
      url: format!("https://github.com/{}/{}.git", owner, repo),
      rev,
    });
  }

  if let Some(rest) = url.strip_prefix("path:") {
    if rest.is_empty() {
      return Err(ParseError::Empty { scheme: "path" });
    }
    return Ok(InputSource::Path {
      path: PathBuf::from(rest),
    });
  }

  Err(ParseError::UnknownScheme(url.to_string()))
}

/// The lock-file `type` for a source.
pub fn source_type(source: &InputSource) -> &'static str {
  match source {
    InputSource::Git { .. } => "git",
    InputSource::Path { .. } => "path",
  }
}
