use std::fmt;

/// Lifecycle stage of a `Scheduler`.
///
/// `Created -> Running -> { Done | Stopping -> Stopped }`. `Done` and `Stopped`
/// are terminal: a scheduler runs at most one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
  Created,
  Running,
  Stopping,
  Stopped,
  Done,
}

impl RunState {
  /// Human-readable state name.
  pub fn name(self) -> &'static str {
    match self {
      RunState::Created => "created",
      RunState::Running => "running",
      RunState::Stopping => "stopping",
      RunState::Stopped => "stopped",
      RunState::Done => "done",
    }
  }

  /// Numeric state code: created 0, stopped 1, done 2, running 3, stopping 4.
  pub fn code(self) -> u8 {
    match self {
      RunState::Created => 0,
      RunState::Stopped => 1,
      RunState::Done => 2,
      RunState::Running => 3,
      RunState::Stopping => 4,
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, RunState::Stopped | RunState::Done)
  }

  /// `true` while a run loop is alive (`Running` or `Stopping`).
  pub fn is_active(self) -> bool {
    matches!(self, RunState::Running | RunState::Stopping)
  }
}

impl fmt::Display for RunState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_names_and_codes() {
    let all = [
      (RunState::Created, "created", 0),
      (RunState::Stopped, "stopped", 1),
      (RunState::Done, "done", 2),
      (RunState::Running, "running", 3),
      (RunState::Stopping, "stopping", 4),
    ];
    for (state, name, code) in all {
      assert_eq!(state.to_string(), name);
      assert_eq!(state.code(), code);
    }
  }

  #[test]
  fn test_terminal_and_active_are_disjoint() {
    for state in [
      RunState::Created,
      RunState::Running,
      RunState::Stopping,
      RunState::Stopped,
      RunState::Done,
    ] {
      assert!(!(state.is_terminal() && state.is_active()), "{state}");
    }
    assert!(!RunState::Created.is_terminal());
    assert!(!RunState::Created.is_active());
  }
}
