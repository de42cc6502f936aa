//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object tagged by its `type` field.

use serde::{Serialize, Deserialize};

use crate::game::engine::MatchId;
use crate::game::error::EngineError;
use crate::game::moves::Move;
use crate::game::snapshot::Snapshot;
use crate::game::state::Seat;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a match and take seat 1.
    CreateMatch(CreateMatchRequest),

    /// Join an existing match in seat 2.
    JoinMatch(JoinMatchRequest),

    /// Submit this round's move.
    SubmitChoice(SubmitChoiceRequest),

    /// Request the current snapshot of a match.
    GetSnapshot {
        /// Match to read.
        match_id: MatchId,
    },

    /// Re-bind a disconnected seat to this connection.
    Resume {
        /// Match holding the seat.
        match_id: MatchId,
        /// Seat to reclaim.
        seat: Seat,
    },

    /// Release this connection's seat.
    Leave,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Match creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMatchRequest {
    /// Host display name.
    pub host_name: String,
    /// Optional caller-chosen match id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
    /// Optional score that ends the match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_threshold: Option<u32>,
}

/// Join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMatchRequest {
    /// Match to join.
    pub match_id: MatchId,
    /// Guest display name.
    pub guest_name: String,
}

/// Choice submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitChoiceRequest {
    /// Match being played.
    pub match_id: MatchId,
    /// Seat submitting.
    pub seat: Seat,
    /// The move.
    #[serde(rename = "move")]
    pub choice: Move,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Match created; this connection holds seat 1.
    MatchCreated(SeatAssignment),

    /// Match joined; this connection holds seat 2.
    MatchJoined(SeatAssignment),

    /// Seat re-bound after reconnect.
    Resumed(SeatAssignment),

    /// Choice recorded.
    ChoiceAccepted {
        /// Match played.
        match_id: MatchId,
        /// Seat that submitted.
        seat: Seat,
        /// Always true.
        accepted: bool,
        /// The submission completed the round.
        round_resolved: bool,
    },

    /// Match state (pushed on every change, or on request).
    Snapshot(Snapshot),

    /// The connection released its seat.
    Left {
        /// Match that was left.
        match_id: MatchId,
    },

    /// The match was removed from the server.
    MatchClosed {
        /// Match that was closed.
        match_id: MatchId,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall-clock time (ms since epoch).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// A (match, seat) pair handed to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatAssignment {
    /// Match identifier.
    pub match_id: MatchId,
    /// Seat held.
    pub seat: Seat,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Empty or malformed field, or unparseable message.
    InvalidInput,
    /// Unknown match.
    NotFound,
    /// Both seats taken.
    MatchFull,
    /// Seat has no player.
    SeatNotOccupied,
    /// Operation not valid in the match's status.
    InvalidState,
    /// Seat already chose this round.
    DuplicateSubmission,
    /// Seat is held by another live connection.
    SeatTaken,
    /// This connection does not hold the seat it acted for.
    NotSeated,
    /// Server at connection capacity.
    ServerOverloaded,
}

impl ServerError {
    /// Build an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&EngineError> for ErrorCode {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::InvalidInput(_) => ErrorCode::InvalidInput,
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::MatchFull => ErrorCode::MatchFull,
            EngineError::SeatNotOccupied(_) => ErrorCode::SeatNotOccupied,
            EngineError::InvalidState { .. } => ErrorCode::InvalidState,
            EngineError::DuplicateSubmission(_) => ErrorCode::DuplicateSubmission,
            EngineError::SeatTaken(_) => ErrorCode::SeatTaken,
        }
    }
}

impl From<&EngineError> for ServerError {
    fn from(err: &EngineError) -> Self {
        Self::new(ErrorCode::from(err), err.to_string())
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Shorthand for an error reply.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(code, message))
    }
}
