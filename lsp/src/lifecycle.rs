//! Client lifecycle: `NotStarted -> Started -> Ready -> ShuttingDown -> Closed`.
//!
//! The happy path is linear. `shutdown` may be entered from any non-terminal
//! state, and `Closed` is terminal.

use std::fmt;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    NotStarted,
    Started,
    Ready,
    ShuttingDown,
    Closed,
}

impl LifecycleState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Started => "started",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// Whether `self -> next` is an edge of the state machine.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use self::LifecycleState::{Closed, NotStarted, Ready, ShuttingDown, Started};
        matches!(
            (self, next),
            (NotStarted, Started)
                | (Started, Ready)
                | (NotStarted | Started | Ready, ShuttingDown)
                | (NotStarted | Started | Ready | ShuttingDown, Closed)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The single authoritative state of one client.
///
/// Mutated only through `&mut`, so transitions never race.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::NotStarted,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Fail unless the current state is one of `allowed`.
    pub fn require(
        &self,
        operation: &'static str,
        allowed: &[LifecycleState],
    ) -> Result<(), ClientError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        if self.state.is_terminal() {
            return Err(ClientError::Closed);
        }
        Err(ClientError::InvalidState {
            operation,
            state: self.state,
        })
    }

    pub fn advance(&mut self, next: LifecycleState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid lifecycle transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::LifecycleState::{Closed, NotStarted, Ready, ShuttingDown, Started};

    const ALL: [LifecycleState; 5] = [NotStarted, Started, Ready, ShuttingDown, Closed];

    #[test]
    fn happy_path_edges() {
        assert!(NotStarted.can_transition_to(Started));
        assert!(Started.can_transition_to(Ready));
        assert!(Ready.can_transition_to(ShuttingDown));
        assert!(ShuttingDown.can_transition_to(Closed));
    }

    #[test]
    fn shutdown_reachable_from_every_live_state() {
        for state in [NotStarted, Started, Ready] {
            assert!(state.can_transition_to(ShuttingDown), "{state}");
            assert!(state.can_transition_to(Closed), "{state}");
        }
    }

    #[test]
    fn closed_is_terminal() {
        for next in ALL {
            assert!(!Closed.can_transition_to(next), "closed -> {next}");
        }
    }

    #[test]
    fn no_backwards_edges() {
        assert!(!Ready.can_transition_to(Started));
        assert!(!Started.can_transition_to(NotStarted));
        assert!(!ShuttingDown.can_transition_to(Ready));
        assert!(!NotStarted.can_transition_to(Ready));
    }

    #[test]
    fn require_reports_closed_distinctly() {
        let mut lifecycle = Lifecycle::new();
        let err = lifecycle.require("execute a command", &[Ready]).unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidState {
                state: NotStarted,
                ..
            }
        ));

        lifecycle.advance(Closed);
        let err = lifecycle.require("execute a command", &[Ready]).unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }
}
