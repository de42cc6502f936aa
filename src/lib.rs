//! # RPS Match Server
//!
//! Authoritative engine for two-player Rock-Paper-Scissors matches, with a
//! WebSocket transport in front of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RPS MATCH SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/            - Match rules (synchronous, no I/O)        │
//! │  ├── moves.rs     - Moves and the beat relation              │
//! │  ├── state.rs     - Per-match state machine                  │
//! │  ├── snapshot.rs  - Client-facing projection                 │
//! │  ├── engine.rs    - Match registry and per-match locking     │
//! │  └── error.rs     - Engine errors                            │
//! │                                                              │
//! │  network/         - Transport                                │
//! │  ├── protocol.rs  - Message types                            │
//! │  └── server.rs    - WebSocket server                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Simultaneous Reveal
//!
//! A submitted move is stored but never projected. Snapshots only say
//! whether each seat has chosen; once both have, the round resolves inside
//! the same locked call and both choices are cleared together.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::{
    EngineConfig, EngineError, MatchEngine, MatchId, MatchOptions, MatchStatus, Move, Outcome,
    Seat, Snapshot, SubmitResult,
};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default score that ends a match.
pub const DEFAULT_WIN_THRESHOLD: u32 = 3;
