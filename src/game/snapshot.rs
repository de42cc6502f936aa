//! Match Snapshots
//!
//! The only view of a match that leaves the engine. Built by
//! `MatchState::snapshot`, pushed to subscribers after every change.

use serde::{Serialize, Deserialize};

use crate::game::engine::MatchId;
use crate::game::moves::Outcome;
use crate::game::state::{MatchStatus, RoundSummary, Seat};

/// Read-only projection of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Match identifier.
    pub match_id: MatchId,
    /// Host name.
    pub seat1_name: Option<String>,
    /// Guest name (None while waiting).
    pub seat2_name: Option<String>,
    /// Seat 1 round wins.
    pub seat1_score: u32,
    /// Seat 2 round wins.
    pub seat2_score: u32,
    /// Current status.
    pub status: MatchStatus,
    /// Seat 1 has a choice in for the open round.
    pub seat1_submitted: bool,
    /// Seat 2 has a choice in for the open round.
    pub seat2_submitted: bool,
    /// Final result (only once finished).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub winner: Option<Outcome>,
    /// Open round number.
    pub round: u32,
    /// Score that ends the match.
    pub win_threshold: u32,
    /// Most recently resolved round.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_round: Option<RoundSummary>,
}

impl Snapshot {
    /// Name in a seat.
    pub fn name(&self, seat: Seat) -> Option<&str> {
        match seat {
            Seat::Seat1 => self.seat1_name.as_deref(),
            Seat::Seat2 => self.seat2_name.as_deref(),
        }
    }

    /// Score for a seat.
    pub fn score(&self, seat: Seat) -> u32 {
        match seat {
            Seat::Seat1 => self.seat1_score,
            Seat::Seat2 => self.seat2_score,
        }
    }

    /// Submitted flag for a seat.
    pub fn submitted(&self, seat: Seat) -> bool {
        match seat {
            Seat::Seat1 => self.seat1_submitted,
            Seat::Seat2 => self.seat2_submitted,
        }
    }

    /// Check if the match is over.
    pub fn is_finished(&self) -> bool {
        self.status == MatchStatus::MatchFinished
    }
}
