use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

/// Where one invocation is in the build sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum PipelineState {
  Pending,
  Fetched,
  Patched,
  Configured,
  Built,
  Verified,
  Done,
  Failed(String),
}

impl PipelineState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, PipelineState::Done | PipelineState::Failed(_))
  }
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PipelineState::Pending => write!(f, "pending"),
      PipelineState::Fetched => write!(f, "fetched"),
      PipelineState::Patched => write!(f, "patched"),
      PipelineState::Configured => write!(f, "configured"),
      PipelineState::Built => write!(f, "built"),
      PipelineState::Verified => write!(f, "verified"),
      PipelineState::Done => write!(f, "done"),
      PipelineState::Failed(reason) => write!(f, "failed: {reason}"),
    }
  }
}

/// The states one invocation visited, in order. Always starts at
/// [`PipelineState::Pending`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StateLog {
  visited: Vec<PipelineState>,
}

impl Default for StateLog {
  fn default() -> Self {
    Self::new()
  }
}

impl StateLog {
  pub fn new() -> Self {
    Self {
      visited: vec![PipelineState::Pending],
    }
  }

  pub fn current(&self) -> &PipelineState {
    // never empty: constructed with Pending
    &self.visited[self.visited.len() - 1]
  }

  pub fn visited(&self) -> &[PipelineState] {
    &self.visited
  }

  /// Move to `state`. Transitions out of a terminal state are ignored.
  pub fn advance(&mut self, state: PipelineState) {
    if self.current().is_terminal() {
      return;
    }
    info!(from = %self.current(), to = %state, "pipeline transition");
    self.visited.push(state);
  }

  pub fn fail(&mut self, reason: impl Into<String>) {
    let reason = reason.into();
    warn!(at = %self.current(), %reason, "pipeline failed");
    self.advance(PipelineState::Failed(reason));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tracing_test::traced_test;

  #[test]
  fn records_transitions_in_order() {
    let mut log = StateLog::new();
    log.advance(PipelineState::Fetched);
    log.advance(PipelineState::Patched);
    log.fail("patch conflict");

    assert_eq!(
      log.visited(),
      &[
        PipelineState::Pending,
        PipelineState::Fetched,
        PipelineState::Patched,
        PipelineState::Failed("patch conflict".to_string()),
      ]
    );
  }

  #[test]
  fn terminal_state_is_final() {
    let mut log = StateLog::new();
    log.fail("boom");
    log.advance(PipelineState::Done);

    assert_eq!(log.current(), &PipelineState::Failed("boom".to_string()));
    assert_eq!(log.visited().len(), 2);
  }

  #[test]
  fn serializes_with_reason() {
    let json = serde_json::to_string(&PipelineState::Failed("x".to_string())).unwrap();
    assert_eq!(json, r#"{"state":"failed","reason":"x"}"#);
    assert_eq!(serde_json::to_string(&PipelineState::Done).unwrap(), r#"{"state":"done"}"#);
  }

  #[test]
  #[traced_test]
  fn failure_is_logged_with_state() {
    let mut log = StateLog::new();
    log.advance(PipelineState::Fetched);
    log.fail("integrity check failed");

    assert!(logs_contain("pipeline failed"));
    assert!(logs_contain("at=fetched"));
  }
}
