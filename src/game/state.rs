//! Match State Definitions
//!
//! The per-match state machine. Pure and synchronous: callers provide
//! serialization (see `engine.rs`), this module provides the transitions.
//!
//! ```text
//! WaitingForPlayers --join--> AwaitingChoices --resolve--> AwaitingChoices
//!                                             \--threshold--> MatchFinished
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;
use serde::{Serialize, Deserialize};

use crate::game::engine::MatchId;
use crate::game::error::EngineError;
use crate::game::moves::{resolve, Move, Outcome};
use crate::game::snapshot::Snapshot;

/// Longest accepted player name, in characters.
pub const MAX_NAME_LEN: usize = 32;

// =============================================================================
// SEAT
// =============================================================================

/// One of the two positions at the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seat {
    /// The host's seat.
    Seat1,
    /// The guest's seat.
    Seat2,
}

impl Seat {
    /// Array index for per-seat storage.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Seat::Seat1 => 0,
            Seat::Seat2 => 1,
        }
    }

    /// The opposing seat.
    pub fn other(self) -> Seat {
        match self {
            Seat::Seat1 => Seat::Seat2,
            Seat::Seat2 => Seat::Seat1,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Seat::Seat1 => "seat1",
            Seat::Seat2 => "seat2",
        }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// Connection state for reconnection support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Player is connected.
    Connected,
    /// Player disconnected, seat kept.
    Disconnected {
        /// When disconnection occurred.
        since: Instant,
    },
}

/// A seated player. The name is fixed for the match's lifetime.
#[derive(Debug, Clone)]
pub struct Player {
    name: String,
    /// Connection state, maintained by the transport.
    pub connection: ConnectionState,
}

impl Player {
    /// Create a connected player.
    pub fn new(name: String) -> Self {
        Self {
            name,
            connection: ConnectionState::Connected,
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if player is connected.
    pub fn is_connected(&self) -> bool {
        matches!(self.connection, ConnectionState::Connected)
    }
}

/// Validate and normalize a player name.
pub fn validate_name(name: &str) -> Result<String, EngineError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid_input("player name must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(EngineError::invalid_input(format!(
            "player name longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(EngineError::invalid_input("player name contains control characters"));
    }
    Ok(trimmed.to_string())
}

// =============================================================================
// MATCH STATUS
// =============================================================================

/// Externally visible match status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Host seated, guest seat empty.
    WaitingForPlayers,
    /// Round open, collecting choices.
    AwaitingChoices,
    /// Terminal.
    MatchFinished,
}

impl MatchStatus {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::WaitingForPlayers => "waiting_for_players",
            MatchStatus::AwaitingChoices => "awaiting_choices",
            MatchStatus::MatchFinished => "match_finished",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of the most recently resolved round. Never carries move values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// 1-based round number.
    pub round: u32,
    /// Who took the round.
    pub outcome: Outcome,
}

/// Result of accepting a choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitResult {
    /// Recorded; the other seat has not chosen yet.
    Pending,
    /// Recorded and the round resolved in the same call.
    Resolved(RoundSummary),
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Complete state of one match.
#[derive(Debug, Clone)]
pub struct MatchState {
    id: MatchId,
    players: [Option<Player>; 2],
    scores: [u32; 2],
    /// Hidden until both are present; cleared together.
    pending: [Option<Move>; 2],
    status: MatchStatus,
    winner: Option<Outcome>,
    win_threshold: u32,
    round: u32,
    last_round: Option<RoundSummary>,
}

impl MatchState {
    /// Create a match with the host in seat 1.
    ///
    /// `host_name` must already be validated and `win_threshold` non-zero.
    pub fn new(id: MatchId, host_name: String, win_threshold: u32) -> Self {
        debug_assert!(win_threshold > 0);
        Self {
            id,
            players: [Some(Player::new(host_name)), None],
            scores: [0; 2],
            pending: [None; 2],
            status: MatchStatus::WaitingForPlayers,
            winner: None,
            win_threshold,
            round: 1,
            last_round: None,
        }
    }

    /// Match identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current status.
    pub fn status(&self) -> MatchStatus {
        self.status
    }

    /// Final result, once finished.
    pub fn winner(&self) -> Option<Outcome> {
        self.winner
    }

    /// Score for a seat.
    pub fn score(&self, seat: Seat) -> u32 {
        self.scores[seat.index()]
    }

    /// Player in a seat.
    pub fn player(&self, seat: Seat) -> Option<&Player> {
        self.players[seat.index()].as_ref()
    }

    /// Round currently open (or the last one played, once finished).
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Score that ends the match.
    pub fn win_threshold(&self) -> u32 {
        self.win_threshold
    }

    /// Whether a seat has a choice stored for the open round.
    pub fn has_submitted(&self, seat: Seat) -> bool {
        self.pending[seat.index()].is_some()
    }

    /// Whether any seated player is still connected.
    pub fn has_connected_seat(&self) -> bool {
        self.players.iter().flatten().any(Player::is_connected)
    }

    /// Seat the guest. Seat 2 is the only seat a join can fill.
    pub fn join(&mut self, guest_name: &str) -> Result<Seat, EngineError> {
        if self.players[Seat::Seat2.index()].is_some() {
            return Err(EngineError::MatchFull);
        }
        let name = validate_name(guest_name)?;

        self.players[Seat::Seat2.index()] = Some(Player::new(name));
        self.status = MatchStatus::AwaitingChoices;
        Ok(Seat::Seat2)
    }

    /// Record a seat's move for the open round; resolves if both are in.
    pub fn submit(&mut self, seat: Seat, choice: Move) -> Result<SubmitResult, EngineError> {
        if self.players[seat.index()].is_none() {
            return Err(EngineError::SeatNotOccupied(seat));
        }
        if self.status != MatchStatus::AwaitingChoices {
            return Err(EngineError::InvalidState {
                expected: MatchStatus::AwaitingChoices,
                actual: self.status,
            });
        }
        if self.pending[seat.index()].is_some() {
            return Err(EngineError::DuplicateSubmission(seat));
        }

        self.pending[seat.index()] = Some(choice);

        match self.pending {
            [Some(seat1), Some(seat2)] => Ok(SubmitResult::Resolved(self.resolve_round(seat1, seat2))),
            _ => Ok(SubmitResult::Pending),
        }
    }

    fn resolve_round(&mut self, seat1: Move, seat2: Move) -> RoundSummary {
        assert_eq!(
            self.status,
            MatchStatus::AwaitingChoices,
            "match {} resolving a round outside AwaitingChoices",
            self.id
        );

        let outcome = resolve(seat1, seat2);
        if let Some(seat) = outcome.winner() {
            self.scores[seat.index()] += 1;
        }
        self.pending = [None; 2];

        let summary = RoundSummary { round: self.round, outcome };
        self.last_round = Some(summary);

        match self.threshold_winner() {
            Some(winner) => self.finish(winner),
            None => self.round += 1,
        }
        summary
    }

    /// Match result if either score has reached the threshold.
    fn threshold_winner(&self) -> Option<Outcome> {
        let [seat1, seat2] = self.scores;
        if seat1.max(seat2) < self.win_threshold {
            return None;
        }
        Some(match seat1.cmp(&seat2) {
            Ordering::Greater => Outcome::Seat1,
            Ordering::Less => Outcome::Seat2,
            Ordering::Equal => Outcome::Tie,
        })
    }

    fn finish(&mut self, winner: Outcome) {
        assert!(
            self.winner.is_none(),
            "match {} winner assigned twice",
            self.id
        );
        self.winner = Some(winner);
        self.status = MatchStatus::MatchFinished;
    }

    /// Mark a seat disconnected. The seat stays reserved.
    pub fn mark_disconnected(&mut self, seat: Seat, now: Instant) -> Result<(), EngineError> {
        let player = self.players[seat.index()]
            .as_mut()
            .ok_or(EngineError::SeatNotOccupied(seat))?;
        if player.is_connected() {
            player.connection = ConnectionState::Disconnected { since: now };
        }
        Ok(())
    }

    /// Reclaim a disconnected seat. A seat whose player is still connected
    /// cannot be taken over.
    pub fn mark_connected(&mut self, seat: Seat) -> Result<(), EngineError> {
        let player = self.players[seat.index()]
            .as_mut()
            .ok_or(EngineError::SeatNotOccupied(seat))?;
        if player.is_connected() {
            return Err(EngineError::SeatTaken(seat));
        }
        player.connection = ConnectionState::Connected;
        Ok(())
    }

    /// Read-only projection for clients.
    pub fn snapshot(&self) -> Snapshot {
        let name = |seat: Seat| self.player(seat).map(|p| p.name().to_string());
        Snapshot {
            match_id: self.id.clone(),
            seat1_name: name(Seat::Seat1),
            seat2_name: name(Seat::Seat2),
            seat1_score: self.score(Seat::Seat1),
            seat2_score: self.score(Seat::Seat2),
            status: self.status,
            seat1_submitted: self.has_submitted(Seat::Seat1),
            seat2_submitted: self.has_submitted(Seat::Seat2),
            winner: self.winner,
            round: self.round,
            win_threshold: self.win_threshold,
            last_round: self.last_round,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
