//! Game Logic Module
//!
//! Match rules and the engine that owns every match. No I/O.
//!
//! ## Module Structure
//!
//! - `moves`: Moves and the beat relation
//! - `state`: Per-match state machine
//! - `snapshot`: Client-facing projection of a match
//! - `engine`: Match registry, per-match locking, snapshot push
//! - `error`: Engine error taxonomy

pub mod moves;
pub mod state;
pub mod snapshot;
pub mod engine;
pub mod error;

// Re-export key types
pub use moves::{Move, Outcome};
pub use state::{MatchState, MatchStatus, RoundSummary, Seat, SubmitResult};
pub use snapshot::Snapshot;
pub use engine::{EngineConfig, MatchEngine, MatchId, MatchOptions};
pub use error::EngineError;
