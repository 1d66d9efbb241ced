//! Avatar state: the single source of truth for the feedback UI.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Visual/audio feedback state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvatarState {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl AvatarState {
    /// Legal transitions: the IDLE → LISTENING → PROCESSING → SPEAKING → IDLE
    /// cycle, any state to IDLE, any state to ERROR. Staying put is allowed.
    pub fn can_transition_to(self, next: AvatarState) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (_, AvatarState::Idle)
                | (_, AvatarState::Error)
                | (AvatarState::Idle, AvatarState::Listening)
                | (AvatarState::Listening, AvatarState::Processing)
                | (AvatarState::Processing, AvatarState::Speaking)
        )
    }

    /// Next state along the cycle
    pub fn next_in_cycle(self) -> AvatarState {
        match self {
            AvatarState::Idle => AvatarState::Listening,
            AvatarState::Listening => AvatarState::Processing,
            AvatarState::Processing => AvatarState::Speaking,
            AvatarState::Speaking | AvatarState::Error => AvatarState::Idle,
        }
    }
}

impl fmt::Display for AvatarState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AvatarState::Idle => "IDLE",
            AvatarState::Listening => "LISTENING",
            AvatarState::Processing => "PROCESSING",
            AvatarState::Speaking => "SPEAKING",
            AvatarState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_is_legal() {
        let mut state = AvatarState::Idle;
        for _ in 0..4 {
            let next = state.next_in_cycle();
            assert!(state.can_transition_to(next), "{} -> {}", state, next);
            state = next;
        }
        assert_eq!(state, AvatarState::Idle);
    }

    #[test]
    fn test_no_skipping() {
        assert!(!AvatarState::Listening.can_transition_to(AvatarState::Speaking));
        assert!(!AvatarState::Idle.can_transition_to(AvatarState::Processing));
        assert!(!AvatarState::Idle.can_transition_to(AvatarState::Speaking));
        assert!(!AvatarState::Speaking.can_transition_to(AvatarState::Listening));
        assert!(!AvatarState::Error.can_transition_to(AvatarState::Listening));
    }

    #[test]
    fn test_resets() {
        for state in [
            AvatarState::Listening,
            AvatarState::Processing,
            AvatarState::Speaking,
            AvatarState::Error,
        ] {
            assert!(state.can_transition_to(AvatarState::Idle));
            assert!(state.can_transition_to(AvatarState::Error));
        }
    }
}
