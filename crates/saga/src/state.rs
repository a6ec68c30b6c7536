//! Saga lifecycle states.

use serde::{Deserialize, Serialize};

/// The state of a saga instance in its lifecycle.
///
/// State transitions:
/// ```text
/// New ──► Running ──┬──► Completed
///                   ├──► Rejected
///                   └──► Failed
/// ```
/// A saga may also jump from `New` straight to a terminal state when the
/// first event it sees already decides its fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// No event has been applied yet.
    #[default]
    New,

    /// At least one event has been applied and the saga is still open.
    Running,

    /// The saga's own logic declared success (terminal state).
    Completed,

    /// The saga's own logic declared it cannot proceed (terminal state).
    Rejected,

    /// An error handler decided to fail the saga (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Rejected | SagaState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::New => "New",
            SagaState::Running => "Running",
            SagaState::Completed => "Completed",
            SagaState::Rejected => "Rejected",
            SagaState::Failed => "Failed",
        }
    }

    /// Parses a state name produced by [`SagaState::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "New" => Some(SagaState::New),
            "Running" => Some(SagaState::Running),
            "Completed" => Some(SagaState::Completed),
            "Rejected" => Some(SagaState::Rejected),
            "Failed" => Some(SagaState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
