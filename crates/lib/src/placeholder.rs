//! Placeholder parsing and substitution for values known only at build time.
//!
//! Flags, build commands, environment values and the install check command
//! may reference locations that do not exist until the pipeline runs (the
//! install prefix, the unpacked source tree, a resolved dependency prefix).
//!
//! # Placeholder Formats
//!
//! - `$${out}` - final install prefix of the artifact
//! - `$${src}` - unpacked, patched source tree
//! - `$${build}` - out-of-tree build directory
//! - `$${jobs}` - requested build parallelism
//! - `$${name}` / `$${version}` - spec name and declared version
//! - `$${option:NAME}` - resolved value of an option
//! - `$${dep:NAME}` - install prefix of a resolved dependency
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` and `${CC}` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use pinbuild_lib::placeholder::{parse, Segment, Placeholder};
//!
//! let segments = parse("-DCMAKE_INSTALL_PREFIX=$${out}").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("-DCMAKE_INSTALL_PREFIX=".to_string()),
//!     Segment::Placeholder(Placeholder::Out),
//! ]);
//! ```

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  Out,
  Src,
  Build,
  Jobs,
  Name,
  Version,
  /// `$${option:NAME}`
  Option(String),
  /// `$${dep:NAME}`
  Dep(String),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder type: {0}")]
  UnknownType(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("placeholder '{0}' is not available at this stage")]
  Unavailable(String),

  #[error("unknown option in placeholder: {0}")]
  UnresolvedOption(String),

  #[error("dependency '{0}' is not part of the resolved environment")]
  UnresolvedDep(String),
}

/// Trait for resolving placeholder values during execution.
pub trait Resolver {
  fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is malformed (unclosed, unknown type, etc.)
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();
            match chars.peek() {
              Some((_, '{')) => {
                // $$${ -> literal $${
                literal.push_str("$${");
                chars.next();
              }
              _ => literal.push_str("$$$"),
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut content = String::new();
            let mut found_close = false;
            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              content.push(c);
            }

            if !found_close {
              return Err(PlaceholderError::Unclosed(pos));
            }

            segments.push(Segment::Placeholder(parse_placeholder_content(&content)?));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_placeholder_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  match content {
    "out" => return Ok(Placeholder::Out),
    "src" => return Ok(Placeholder::Src),
    "build" => return Ok(Placeholder::Build),
    "jobs" => return Ok(Placeholder::Jobs),
    "name" => return Ok(Placeholder::Name),
    "version" => return Ok(Placeholder::Version),
    _ => {}
  }

  let (kind, rest) = content
    .split_once(':')
    .ok_or_else(|| PlaceholderError::UnknownType(content.to_string()))?;

  if rest.is_empty() {
    return Err(PlaceholderError::Malformed(format!("empty name in '{content}'")));
  }

  match kind {
    "option" => Ok(Placeholder::Option(rest.to_string())),
    "dep" => Ok(Placeholder::Dep(rest.to_string())),
    _ => Err(PlaceholderError::UnknownType(kind.to_string())),
  }
}

/// Substitute all placeholders in a string using the provided resolver.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  let mut result = String::new();

  for segment in &segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p) => result.push_str(&resolver.resolve(p)?),
    }
  }

  Ok(result)
}

/// Substitute placeholders in every element of a list.
pub fn substitute_all(inputs: &[String], resolver: &impl Resolver) -> Result<Vec<String>, PlaceholderError> {
  inputs.iter().map(|s| substitute(s, resolver)).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  struct TestResolver {
    out: Option<String>,
    options: HashMap<String, String>,
  }

  impl Resolver for TestResolver {
    fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError> {
      match placeholder {
        Placeholder::Out => self.out.clone().ok_or_else(|| PlaceholderError::Unavailable("out".into())),
        Placeholder::Jobs => Ok("4".to_string()),
        Placeholder::Option(name) => self
          .options
          .get(name)
          .cloned()
          .ok_or_else(|| PlaceholderError::UnresolvedOption(name.clone())),
        other => Err(PlaceholderError::Unavailable(format!("{other:?}"))),
      }
    }
  }

  fn resolver() -> TestResolver {
    TestResolver {
      out: Some("/store/build/abc".to_string()),
      options: HashMap::from([("with_extra".to_string(), "false".to_string())]),
    }
  }

  #[test]
  fn parse_literal_only() {
    assert_eq!(
      parse("cmake --build .").unwrap(),
      vec![Segment::Literal("cmake --build .".to_string())]
    );
  }

  #[test]
  fn parse_all_simple_kinds() {
    let segments = parse("$${out}$${src}$${build}$${jobs}$${name}$${version}").unwrap();
    assert_eq!(
      segments,
      vec![
        Segment::Placeholder(Placeholder::Out),
        Segment::Placeholder(Placeholder::Src),
        Segment::Placeholder(Placeholder::Build),
        Segment::Placeholder(Placeholder::Jobs),
        Segment::Placeholder(Placeholder::Name),
        Segment::Placeholder(Placeholder::Version),
      ]
    );
  }

  #[test]
  fn parse_named_kinds() {
    assert_eq!(
      parse("$${option:with_extra}").unwrap(),
      vec![Segment::Placeholder(Placeholder::Option("with_extra".to_string()))]
    );
    assert_eq!(
      parse("$${dep:python3}/bin").unwrap(),
      vec![
        Segment::Placeholder(Placeholder::Dep("python3".to_string())),
        Segment::Literal("/bin".to_string()),
      ]
    );
  }

  #[test]
  fn shell_variables_pass_through() {
    let resolver = resolver();
    assert_eq!(substitute("$HOME ${CC} $$", &resolver).unwrap(), "$HOME ${CC} $$");
  }

  #[test]
  fn escape_produces_literal_placeholder_syntax() {
    let resolver = resolver();
    assert_eq!(substitute("$$${out}", &resolver).unwrap(), "$${out}");
  }

  #[test]
  fn unclosed_placeholder_errors() {
    assert_eq!(parse("abc $${out"), Err(PlaceholderError::Unclosed(4)));
  }

  #[test]
  fn unknown_kind_errors() {
    assert!(matches!(parse("$${action:0}"), Err(PlaceholderError::UnknownType(k)) if k == "action"));
    assert!(matches!(parse("$${nope}"), Err(PlaceholderError::UnknownType(_))));
  }

  #[test]
  fn empty_name_is_malformed() {
    assert!(matches!(parse("$${option:}"), Err(PlaceholderError::Malformed(_))));
  }

  #[test]
  fn substitute_resolves_values() {
    let resolver = resolver();
    assert_eq!(
      substitute("-DCMAKE_INSTALL_PREFIX=$${out} -j$${jobs}", &resolver).unwrap(),
      "-DCMAKE_INSTALL_PREFIX=/store/build/abc -j4"
    );
    assert_eq!(
      substitute("-DEXTRA=$${option:with_extra}", &resolver).unwrap(),
      "-DEXTRA=false"
    );
  }

  #[test]
  fn substitute_propagates_resolution_errors() {
    let resolver = resolver();
    assert_eq!(
      substitute("$${option:missing}", &resolver),
      Err(PlaceholderError::UnresolvedOption("missing".to_string()))
    );
  }
}
