//! Deferred values in build definitions.
//!
//! A build is hashed before anything is realized, so values only known at
//! realize time (the build's own store path, outputs of other builds) are
//! written as placeholders and substituted just before an action runs.
//!
//! - `$${out}`: the store path of the build being realized
//! - `$${build:<hash>:<output>}`: a named output of a dependency
//! - `$${action:N}`: trimmed stdout of the N-th action of the same build
//!
//! A single `$` is never special, so `$HOME` reaches the shell untouched.
//! `$$${` produces a literal `$${`.
//!
//! ```
//! use flint_lib::placeholder::{parse, Placeholder, Segment};
//!
//! let segments = parse("$${out}/bin:$PATH").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder(Placeholder::Out),
//!     Segment::Literal("/bin:$PATH".to_string()),
//! ]);
//! ```

use thiserror::Error;

const OPEN: &str = "$${";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  Out,
  Build { hash: String, output: String },
  Action(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at byte {0}")]
  Unclosed(usize),

  #[error("unknown placeholder kind '{0}'")]
  UnknownKind(String),

  #[error("invalid action index '{0}'")]
  InvalidActionIndex(String),

  #[error("malformed placeholder '{0}'")]
  Malformed(String),

  #[error("no output of action {0} is available yet")]
  UnresolvedAction(usize),

  #[error("build {hash} has no output '{output}'")]
  UnresolvedBuild { hash: String, output: String },
}

/// Supplies placeholder values while a build is realized.
pub trait Resolver {
  fn resolve_out(&self) -> Result<&str, PlaceholderError>;
  fn resolve_build(&self, hash: &str, output: &str) -> Result<&str, PlaceholderError>;
  fn resolve_action(&self, index: usize) -> Result<&str, PlaceholderError>;
}

pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut rest = input;
  let mut offset = 0;

  while let Some(start) = rest.find(OPEN) {
    let before = &rest[..start];

    if let Some(escaped) = before.strip_suffix('$') {
      literal.push_str(escaped);
      literal.push_str(OPEN);
      offset += start + OPEN.len();
      rest = &rest[start + OPEN.len()..];
      continue;
    }

    literal.push_str(before);
    let body = &rest[start + OPEN.len()..];
    let close = body.find('}').ok_or(PlaceholderError::Unclosed(offset + start))?;

    if !literal.is_empty() {
      segments.push(Segment::Literal(std::mem::take(&mut literal)));
    }
    segments.push(Segment::Placeholder(parse_body(&body[..close])?));

    let consumed = start + OPEN.len() + close + 1;
    offset += consumed;
    rest = &rest[consumed..];
  }

  literal.push_str(rest);
  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }
  Ok(segments)
}

fn parse_body(body: &str) -> Result<Placeholder, PlaceholderError> {
  if body == "out" {
    return Ok(Placeholder::Out);
  }

  let (kind, rest) = body
    .split_once(':')
    .ok_or_else(|| PlaceholderError::Malformed(body.to_string()))?;

  match kind {
    "action" => rest
      .parse()
      .map(Placeholder::Action)
      .map_err(|_| PlaceholderError::InvalidActionIndex(rest.to_string())),
    "build" => match rest.split_once(':') {
      Some((hash, output)) if !hash.is_empty() && !output.is_empty() => Ok(Placeholder::Build {
        hash: hash.to_string(),
        output: output.to_string(),
      }),
      _ => Err(PlaceholderError::Malformed(body.to_string())),
    },
    other => Err(PlaceholderError::UnknownKind(other.to_string())),
  }
}

pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut out = String::with_capacity(input.len());
  for segment in parse(input)? {
    match segment {
      Segment::Literal(s) => out.push_str(&s),
      Segment::Placeholder(Placeholder::Out) => out.push_str(resolver.resolve_out()?),
      Segment::Placeholder(Placeholder::Build { hash, output }) => out.push_str(resolver.resolve_build(&hash, &output)?),
      Segment::Placeholder(Placeholder::Action(i)) => out.push_str(resolver.resolve_action(i)?),
    }
  }
  Ok(out)
}

/// Build references made by `input`, in order of appearance.
pub fn build_refs(input: &str) -> Result<Vec<(String, String)>, PlaceholderError> {
  Ok(
    parse(input)?
      .into_iter()
      .filter_map(|s| match s {
        Segment::Placeholder(Placeholder::Build { hash, output }) => Some((hash, output)),
        _ => None,
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  struct MapResolver {
    out: String,
    builds: HashMap<(String, String), String>,
    actions: Vec<String>,
  }

  impl MapResolver {
    fn new() -> Self {
      Self {
        out: "/store/build/self".to_string(),
        builds: HashMap::new(),
        actions: Vec::new(),
      }
    }

    fn with_build(mut self, hash: &str, output: &str, value: &str) -> Self {
      self.builds.insert((hash.to_string(), output.to_string()), value.to_string());
      self
    }
  }

  impl Resolver for MapResolver {
    fn resolve_out(&self) -> Result<&str, PlaceholderError> {
      Ok(&self.out)
    }

    fn resolve_build(&self, hash: &str, output: &str) -> Result<&str, PlaceholderError> {
      self
        .builds
        .get(&(hash.to_string(), output.to_string()))
        .map(String::as_str)
        .ok_or_else(|| PlaceholderError::UnresolvedBuild {
          hash: hash.to_string(),
          output: output.to_string(),
        })
    }

    fn resolve_action(&self, index: usize) -> Result<&str, PlaceholderError> {
      self
        .actions
        .get(index)
        .map(String::as_str)
        .ok_or(PlaceholderError::UnresolvedAction(index))
    }
  }

  mod parsing {
    use super::*;

    #[test]
    fn plain_text_is_one_literal() {
      assert_eq!(parse("cargo build").unwrap(), vec![Segment::Literal("cargo build".to_string())]);
    }

    #[test]
    fn empty_input_has_no_segments() {
      assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn shell_variables_pass_through() {
      assert_eq!(
        parse("$HOME/$$ ${PATH}").unwrap(),
        vec![Segment::Literal("$HOME/$$ ${PATH}".to_string())]
      );
    }

    #[test]
    fn mixed_segments() {
      let segments = parse("cp -r $${build:abc:target} $${out}/tmp/target").unwrap();
      assert_eq!(
        segments,
        vec![
          Segment::Literal("cp -r ".to_string()),
          Segment::Placeholder(Placeholder::Build {
            hash: "abc".to_string(),
            output: "target".to_string(),
          }),
          Segment::Literal(" ".to_string()),
          Segment::Placeholder(Placeholder::Out),
          Segment::Literal("/tmp/target".to_string()),
        ]
      );
    }

    #[test]
    fn escape_yields_literal_open() {
      assert_eq!(
        parse("echo $$${out}").unwrap(),
        vec![Segment::Literal("echo $${out}".to_string())]
      );
    }

    #[test]
    fn action_index() {
      assert_eq!(parse("$${action:2}").unwrap(), vec![Segment::Placeholder(Placeholder::Action(2))]);
    }

    #[test]
    fn unclosed_reports_position() {
      assert_eq!(parse("ab$${out").unwrap_err(), PlaceholderError::Unclosed(2));
    }

    #[test]
    fn unknown_kind() {
      assert!(matches!(parse("$${bind:x:y}"), Err(PlaceholderError::UnknownKind(k)) if k == "bind"));
    }

    #[test]
    fn build_without_output_is_malformed() {
      assert!(matches!(parse("$${build:abc}"), Err(PlaceholderError::Malformed(_))));
      assert!(matches!(parse("$${build::out}"), Err(PlaceholderError::Malformed(_))));
    }

    #[test]
    fn bad_action_index() {
      assert!(matches!(parse("$${action:x}"), Err(PlaceholderError::InvalidActionIndex(_))));
    }
  }

  mod substitution {
    use super::*;

    #[test]
    fn resolves_out_and_builds() {
      let resolver = MapResolver::new().with_build("abc", "bin", "/store/build/abc/bin");
      let result = substitute("$${build:abc:bin}/engine > $${out}/log", &resolver).unwrap();
      assert_eq!(result, "/store/build/abc/bin/engine > /store/build/self/log");
    }

    #[test]
    fn missing_build_output_is_an_error() {
      let resolver = MapResolver::new();
      let err = substitute("$${build:abc:bin}", &resolver).unwrap_err();
      assert_eq!(
        err,
        PlaceholderError::UnresolvedBuild {
          hash: "abc".to_string(),
          output: "bin".to_string()
        }
      );
    }

    #[test]
    fn missing_action_is_an_error() {
      let resolver = MapResolver::new();
      assert_eq!(
        substitute("$${action:0}", &resolver).unwrap_err(),
        PlaceholderError::UnresolvedAction(0)
      );
    }
  }

  #[test]
  fn build_refs_in_order() {
    let refs = build_refs("$${build:b:out} $${out} $${build:a:target}").unwrap();
    assert_eq!(
      refs,
      vec![
        ("b".to_string(), "out".to_string()),
        ("a".to_string(), "target".to_string())
      ]
    );
  }
}
