//! Turn state shared between the tick loop and the active turn task

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// State of the turn controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No recording, no playback; watching for speech
    Idle,
    /// Recording an utterance
    Listening,
    /// Transcribing and generating a reply; no new audio is consumed
    Processing,
    /// Playing the synthesized reply; watching for barge-in
    Speaking,
}

impl TurnState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Listening => 1,
            Self::Processing => 2,
            Self::Speaking => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Listening,
            2 => Self::Processing,
            3 => Self::Speaking,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// Shared cell holding the controller state.
///
/// The tick loop makes all state decisions; the turn task only advances
/// Processing -> Speaking -> Idle through [`StateCell::compare_swap`] so a
/// barge-in that already reset the state is never overwritten.
#[derive(Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    /// Create a new cell in the Idle state
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(TurnState::Idle.as_u8())))
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> TurnState {
        TurnState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Unconditionally set the state
    pub fn set(&self, next: TurnState) {
        let prev = TurnState::from_u8(self.0.swap(next.as_u8(), Ordering::AcqRel));
        if prev != next {
            tracing::debug!(from = %prev, to = %next, "state changed");
        }
    }

    /// Set the state only if it currently equals `from`.
    ///
    /// Returns true when the transition was applied.
    pub fn compare_swap(&self, from: TurnState, to: TurnState) -> bool {
        let swapped = self
            .0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped && from != to {
            tracing::debug!(from = %from, to = %to, "state changed");
        }
        swapped
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
