//! Terminal rendering for pinbuild commands.
//!
//! stdout carries results only, because `pinbuild env` is meant for `eval`.
//! Warnings and failures always go to stderr. Every human-readable command
//! also has a `--json` form that goes through [`print_json`].

use std::fmt::Display;
use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

/// Width of the label column in [`field`] rows.
const LABEL_WIDTH: usize = 14;

/// Hex digits kept by [`short_hash`].
const SHORT_HASH: usize = 12;

/// Leading mark of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Done,
  Note,
  Warn,
  Fail,
}

impl Status {
  fn mark(self) -> &'static str {
    match self {
      Status::Done => "✓",
      Status::Note => "•",
      Status::Warn => "!",
      Status::Fail => "✗",
    }
  }

  fn stream(self) -> Stream {
    match self {
      Status::Done | Status::Note => Stream::Stdout,
      Status::Warn | Status::Fail => Stream::Stderr,
    }
  }
}

/// Print one status line, e.g. `✓ Built zlib 1.3.1`.
pub fn status(status: Status, message: impl Display) {
  let stream = status.stream();
  let mark = status.mark();
  let mark = mark.if_supports_color(stream, |m| match status {
    Status::Done => m.green().to_string(),
    Status::Note => m.cyan().to_string(),
    Status::Warn => m.yellow().to_string(),
    Status::Fail => m.red().bold().to_string(),
  });
  match stream {
    Stream::Stdout => println!("{mark} {message}"),
    _ => eprintln!("{mark} {message}"),
  }
}

/// Print an aligned `label: value` row under a status line.
pub fn field(label: &str, value: impl Display) {
  let label = format!("{label}:");
  let label = format!("{label:<LABEL_WIDTH$}");
  println!("  {} {value}", label.if_supports_color(Stream::Stdout, |l| l.dimmed()));
}

/// Print a blank line and a section heading.
pub fn section(title: &str) {
  println!();
  println!("{}", title.if_supports_color(Stream::Stdout, |t| t.bold()));
}

/// Print `from → to`, indented one level per `depth`.
pub fn link(depth: usize, from: impl Display, to: impl Display) {
  let indent = "  ".repeat(depth + 1);
  println!("{indent}{from} {} {to}", "→".if_supports_color(Stream::Stdout, |a| a.dimmed()));
}

/// Leading digits of a plan or content hash.
pub fn short_hash(hash: &str) -> &str {
  hash.get(..SHORT_HASH).unwrap_or(hash)
}

/// Wall time of a command, rounded to milliseconds.
pub fn elapsed(duration: Duration) -> String {
  let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
  humantime::format_duration(Duration::from_millis(millis)).to_string()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let text = serde_json::to_string_pretty(value).context("Failed to encode command output as JSON")?;
  println!("{text}");
  Ok(())
}
