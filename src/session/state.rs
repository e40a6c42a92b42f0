//! # Session State Machine
//!
//! ## Lifecycle:
//! 1. **Idle**: connection open, waiting for `init`
//! 2. **Listening**: accepting audio and cutting windows
//! 3. **Processing**: one window is running through transcribe, generate, synthesize
//! 4. **Closed**: terminal; the connection is gone and history is cleared
//!
//! Processing always returns to Listening, whether the turn succeeded or hit a
//! recoverable error. Any state may move to Closed.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Listening,
    Processing,
    Closed,
}

impl SessionState {
    /// Convert state to string for logs and status endpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Processing => "processing",
            SessionState::Closed => "closed",
        }
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Listening)
                | (Listening, Processing)
                | (Processing, Listening)
                | (Idle | Listening | Processing, Closed)
        )
    }

    /// Audio is buffered in both Listening and Processing.
    pub fn accepts_audio(&self) -> bool {
        matches!(self, SessionState::Listening | SessionState::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published on the session's watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Windows that finished their turn (successfully or not)
    pub windows_completed: u64,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            windows_completed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Listening));
        assert!(Processing.can_transition_to(Closed));
        assert!(Idle.can_transition_to(Closed));

        assert!(!Idle.can_transition_to(Processing));
        assert!(!Listening.can_transition_to(Idle));
        assert!(!Closed.can_transition_to(Listening));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[test]
    fn test_audio_acceptance() {
        assert!(!SessionState::Idle.accepts_audio());
        assert!(SessionState::Listening.accepts_audio());
        assert!(SessionState::Processing.accepts_audio());
        assert!(!SessionState::Closed.accepts_audio());
        assert!(SessionState::Closed.is_terminal());
    }
}
