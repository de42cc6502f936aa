//! Engine Errors
//!
//! Every variant is recoverable by the caller and leaves match state untouched.

use crate::game::engine::MatchId;
use crate::game::state::{MatchStatus, Seat};

/// Errors returned by match engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Empty or malformed request field.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown match identifier.
    #[error("Match not found: {0}")]
    NotFound(MatchId),

    /// Both seats are already taken.
    #[error("Match is full")]
    MatchFull,

    /// The seat has no player.
    #[error("Seat {0} is not occupied")]
    SeatNotOccupied(Seat),

    /// Operation not allowed in the current status.
    #[error("Invalid state: expected {expected}, match is {actual}")]
    InvalidState {
        /// Status the operation requires.
        expected: MatchStatus,
        /// Status the match is actually in.
        actual: MatchStatus,
    },

    /// The seat already has a choice pending this round.
    #[error("Seat {0} already submitted a choice this round")]
    DuplicateSubmission(Seat),

    /// The seat is still held by a connected player.
    #[error("Seat {0} is held by a connected player")]
    SeatTaken(Seat),
}

impl EngineError {
    /// Shorthand for [`EngineError::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// True for request-sequencing violations, as opposed to malformed input
    /// or an unknown match.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            EngineError::MatchFull
                | EngineError::SeatNotOccupied(_)
                | EngineError::InvalidState { .. }
                | EngineError::DuplicateSubmission(_)
                | EngineError::SeatTaken(_)
        )
    }
}
