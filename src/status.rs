// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Subscription lifecycle status.

use core::fmt;
use serde::{Deserialize, Serialize};

/// `Uninitialized → CatchingUp → Live → {Stopped | Faulted}`
///
/// Once `Stopped` or `Faulted`, nothing more is drained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Uninitialized,
    CatchingUp,
    Live,
    Stopped,
    Faulted,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Stopped | Status::Faulted)
    }

    /// Whether moving to `next` is a legal step of the lifecycle.
    pub fn can_move_to(&self, next: Status) -> bool {
        use Status::*;
        match (self, next) {
            (Stopped | Faulted, _) => false,
            (Uninitialized, CatchingUp | Live | Stopped | Faulted) => true,
            (CatchingUp, Live | Stopped | Faulted) => true,
            // a reconnect replays the gap before going live again
            (Live, CatchingUp | Stopped | Faulted) => true,
            _ => false,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Uninitialized
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Uninitialized => "uninitialized",
            Status::CatchingUp => "catching-up",
            Status::Live => "live",
            Status::Stopped => "stopped",
            Status::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_sticky() {
        for next in [Status::CatchingUp, Status::Live, Status::Stopped, Status::Faulted] {
            assert!(!Status::Stopped.can_move_to(next));
            assert!(!Status::Faulted.can_move_to(next));
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(Status::Uninitialized.can_move_to(Status::CatchingUp));
        assert!(Status::CatchingUp.can_move_to(Status::Live));
        assert!(Status::Live.can_move_to(Status::CatchingUp));
        assert!(Status::Live.can_move_to(Status::Faulted));
        assert!(!Status::CatchingUp.can_move_to(Status::Uninitialized));
    }
}
