//! Per-item attempt state machine
//!
//! Every listing page and detail URL is driven through this machine. The
//! retry loop in the crawler owns the sleeps; this type only decides what
//! comes next.

use std::fmt;

/// Where a single item is in its retry lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Not yet tried in this run
    Pending,

    /// The n-th attempt (1-based) is in progress or about to start
    Attempting(u32),

    /// An attempt produced a value
    Succeeded,

    /// Every allowed attempt failed
    Failed,
}

/// Outcome of one step of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptEvent {
    Start,
    Success,
    Failure,
}

impl AttemptState {
    /// Applies an event and returns the next state
    ///
    /// A failure on attempt `n` moves to `Attempting(n + 1)` while
    /// `n < max_attempts`, otherwise to `Failed`. Events that make no sense
    /// for the current state leave it unchanged.
    pub fn advance(self, event: AttemptEvent, max_attempts: u32) -> Self {
        match (self, event) {
            (Self::Pending, AttemptEvent::Start) => Self::Attempting(1),
            (Self::Attempting(_), AttemptEvent::Success) => Self::Succeeded,
            (Self::Attempting(n), AttemptEvent::Failure) if n < max_attempts => {
                Self::Attempting(n + 1)
            }
            (Self::Attempting(_), AttemptEvent::Failure) => Self::Failed,
            (state, _) => state,
        }
    }

    /// Returns the current attempt number, if an attempt is underway
    pub fn attempt(&self) -> Option<u32> {
        match self {
            Self::Attempting(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns true once the machine can no longer move
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Attempting(n) => write!(f, "attempting({})", n),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
