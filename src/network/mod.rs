//! Network Layer
//!
//! WebSocket transport in front of the match engine.
//! All game state changes go through `game::MatchEngine`.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ErrorCode, ServerError};
pub use server::{GameServer, ServerConfig, GameServerError};
