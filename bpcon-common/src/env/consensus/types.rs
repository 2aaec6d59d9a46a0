use std::fmt;

use serde::{Deserialize, Serialize};

/// Proposer-chosen round number. `Ballot::NONE` (-1) means "never voted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ballot(pub i64);

impl Ballot {
    pub const NONE: Ballot = Ballot(-1);

    pub fn next(self) -> Ballot {
        Ballot(self.0 + 1)
    }

    pub fn is_none(self) -> bool {
        self.0 < 0
    }
}

impl Default for Ballot {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a proposer's ballot round currently is.
///
/// `Committed`, `Rejected` and `TimedOut` are terminal: they are reported for the
/// round that just ended, and the engine accepts a new proposal right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    Idle,
    Awaiting1b,
    Awaiting2b,
    Committed,
    Rejected,
    TimedOut,
}

impl RoundState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundState::Committed | RoundState::Rejected | RoundState::TimedOut)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, RoundState::Awaiting1b | RoundState::Awaiting2b)
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundState::Idle => "IDLE",
            RoundState::Awaiting1b => "AWAITING_1B",
            RoundState::Awaiting2b => "AWAITING_2B",
            RoundState::Committed => "COMMITTED",
            RoundState::Rejected => "REJECTED",
            RoundState::TimedOut => "TIMED_OUT",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ballot_ordering() {
        assert!(Ballot::NONE < Ballot(0));
        assert_eq!(Ballot::NONE.next(), Ballot(0));
        assert!(Ballot::NONE.is_none());
        assert!(!Ballot(0).is_none());
    }

    #[test]
    fn test_round_state_classes() {
        assert!(RoundState::TimedOut.is_terminal());
        assert!(!RoundState::Idle.is_terminal());
        assert!(RoundState::Awaiting2b.is_in_flight());
        assert!(!RoundState::Committed.is_in_flight());
    }
}
