//! Match Engine
//!
//! Owns every live match. Each match sits behind its own lock, so
//! operations on one match are serialized while different matches proceed
//! in parallel. All operations are synchronous and never do I/O.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::game::error::EngineError;
use crate::game::moves::Move;
use crate::game::snapshot::Snapshot;
use crate::game::state::{validate_name, MatchState, Seat, SubmitResult};

/// Opaque match identifier.
pub type MatchId = String;

/// Longest accepted caller-supplied match id.
pub const MAX_MATCH_ID_LEN: usize = 64;

/// Largest per-match snapshot buffer.
pub const MAX_SNAPSHOT_BUFFER: usize = 4096;

/// Read an env var, falling back to `default` when unset or unparseable.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Score that ends a match unless overridden at creation.
    pub default_win_threshold: u32,
    /// How long a match with no connected seat survives.
    pub idle_timeout: Duration,
    /// Snapshots buffered per subscriber before old ones are dropped.
    pub snapshot_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_win_threshold: crate::DEFAULT_WIN_THRESHOLD,
            idle_timeout: Duration::from_secs(300),
            snapshot_buffer: 64,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            default_win_threshold: env_or("RPS_WIN_THRESHOLD", defaults.default_win_threshold),
            idle_timeout: Duration::from_secs(env_or(
                "RPS_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            snapshot_buffer: env_or("RPS_SNAPSHOT_BUFFER", defaults.snapshot_buffer),
        };
        config.sanitized()
    }

    /// Replace values the engine cannot run with.
    fn sanitized(mut self) -> Self {
        if self.default_win_threshold == 0 {
            warn!("Win threshold 0 is invalid, using {}", crate::DEFAULT_WIN_THRESHOLD);
            self.default_win_threshold = crate::DEFAULT_WIN_THRESHOLD;
        }
        if self.snapshot_buffer == 0 {
            self.snapshot_buffer = 1;
        }
        if self.snapshot_buffer > MAX_SNAPSHOT_BUFFER {
            warn!(
                "Snapshot buffer {} too large, using {}",
                self.snapshot_buffer, MAX_SNAPSHOT_BUFFER
            );
            self.snapshot_buffer = MAX_SNAPSHOT_BUFFER;
        }
        self
    }
}

/// Per-match overrides for [`MatchEngine::create_match_with`].
#[derive(Debug, Clone, Default)]
pub struct MatchOptions {
    /// Caller-chosen id; a UUID is generated when None.
    pub match_id: Option<MatchId>,
    /// Score that ends this match.
    pub win_threshold: Option<u32>,
}

// =============================================================================
// MATCH SLOT
// =============================================================================

/// A match plus its push channel.
struct MatchSlot {
    state: MatchState,
    updates: broadcast::Sender<Snapshot>,
    last_activity: Instant,
    /// Set when the slot is removed from the registry, so an operation that
    /// looked it up just before removal fails instead of mutating an orphan.
    closed: bool,
}

impl MatchSlot {
    /// Push the current snapshot. A send with no subscribers is not an error.
    fn emit(&self) {
        let _ = self.updates.send(self.state.snapshot());
    }
}

// =============================================================================
// MATCH ENGINE
// =============================================================================

/// Registry and state machine driver for all matches.
pub struct MatchEngine {
    config: EngineConfig,
    matches: RwLock<BTreeMap<MatchId, Arc<Mutex<MatchSlot>>>>,
}

impl MatchEngine {
    /// Create an engine with no matches.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: config.sanitized(),
            matches: RwLock::new(BTreeMap::new()),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a match with `host_name` in seat 1.
    pub fn create_match(&self, host_name: &str) -> Result<MatchId, EngineError> {
        self.create_match_with(host_name, MatchOptions::default())
    }

    /// Create a match with per-match overrides.
    pub fn create_match_with(
        &self,
        host_name: &str,
        options: MatchOptions,
    ) -> Result<MatchId, EngineError> {
        let host = validate_name(host_name)?;
        let win_threshold = match options.win_threshold {
            Some(0) => return Err(EngineError::invalid_input("win threshold must be at least 1")),
            Some(threshold) => threshold,
            None => self.config.default_win_threshold,
        };
        let requested_id = options.match_id.map(validate_match_id).transpose()?;

        let mut matches = self.matches.write();
        let id = match requested_id {
            Some(id) if matches.contains_key(&id) => {
                return Err(EngineError::invalid_input(format!("match id {} already in use", id)));
            }
            Some(id) => id,
            None => loop {
                let id = uuid::Uuid::new_v4().to_string();
                if !matches.contains_key(&id) {
                    break id;
                }
            },
        };

        let (updates, _) = broadcast::channel(self.config.snapshot_buffer);
        let slot = MatchSlot {
            state: MatchState::new(id.clone(), host.clone(), win_threshold),
            updates,
            last_activity: Instant::now(),
            closed: false,
        };
        matches.insert(id.clone(), Arc::new(Mutex::new(slot)));

        info!("Match {} created by {} (first to {})", id, host, win_threshold);
        Ok(id)
    }

    /// Seat a guest in seat 2 and open the first round.
    pub fn join_match(&self, match_id: &str, guest_name: &str) -> Result<Seat, EngineError> {
        let seat = self.mutate(match_id, |state| state.join(guest_name))?;
        info!("Match {} joined, {} seated", match_id, seat);
        Ok(seat)
    }

    /// Record a seat's move. Resolves the round when both moves are in.
    pub fn submit_choice(
        &self,
        match_id: &str,
        seat: Seat,
        choice: Move,
    ) -> Result<SubmitResult, EngineError> {
        let (result, snapshot) = self.mutate(match_id, |state| {
            state.submit(seat, choice).map(|result| (result, state.snapshot()))
        })?;

        match result {
            SubmitResult::Pending => {
                debug!("Match {}: {} submitted, waiting for {}", match_id, seat, seat.other());
            }
            SubmitResult::Resolved(summary) => {
                info!(
                    "Match {} round {} resolved: {:?} ({}-{})",
                    match_id, summary.round, summary.outcome,
                    snapshot.seat1_score, snapshot.seat2_score
                );
                if let Some(winner) = snapshot.winner {
                    info!("Match {} finished, winner {:?}", match_id, winner);
                }
            }
        }
        Ok(result)
    }

    /// Current snapshot of a match.
    pub fn get_snapshot(&self, match_id: &str) -> Result<Snapshot, EngineError> {
        let slot = self.slot(match_id)?;
        let slot = slot.lock();
        if slot.closed {
            return Err(EngineError::NotFound(match_id.to_string()));
        }
        Ok(slot.state.snapshot())
    }

    /// Subscribe to snapshot pushes for a match.
    pub fn subscribe(&self, match_id: &str) -> Result<broadcast::Receiver<Snapshot>, EngineError> {
        let slot = self.slot(match_id)?;
        let slot = slot.lock();
        if slot.closed {
            return Err(EngineError::NotFound(match_id.to_string()));
        }
        Ok(slot.updates.subscribe())
    }

    /// Mark a seat's connection lost. The seat stays reserved.
    pub fn disconnect_seat(&self, match_id: &str, seat: Seat) -> Result<(), EngineError> {
        self.mutate(match_id, |state| state.mark_disconnected(seat, Instant::now()))?;
        debug!("Match {}: {} disconnected", match_id, seat);
        Ok(())
    }

    /// Mark a disconnected seat connected again. `SeatTaken` if its player
    /// is still connected.
    pub fn reconnect_seat(&self, match_id: &str, seat: Seat) -> Result<(), EngineError> {
        self.mutate(match_id, |state| state.mark_connected(seat))?;
        debug!("Match {}: {} reconnected", match_id, seat);
        Ok(())
    }

    /// Remove a match. Subscribers see their channel close.
    pub fn close_match(&self, match_id: &str) -> Result<(), EngineError> {
        let slot = self.matches
            .write()
            .remove(match_id)
            .ok_or_else(|| EngineError::NotFound(match_id.to_string()))?;
        slot.lock().closed = true;
        info!("Match {} closed", match_id);
        Ok(())
    }

    /// Remove matches with no connected seat that have been idle past the
    /// timeout. Returns the removed ids.
    pub fn sweep_idle(&self, now: Instant) -> Vec<MatchId> {
        let mut matches = self.matches.write();
        let expired: Vec<MatchId> = matches.iter()
            .filter(|(_, slot)| {
                let slot = slot.lock();
                !slot.state.has_connected_seat()
                    && now.saturating_duration_since(slot.last_activity) >= self.config.idle_timeout
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(slot) = matches.remove(id) {
                slot.lock().closed = true;
                info!("Match {} expired after idle timeout", id);
            }
        }
        expired
    }

    /// Number of live matches.
    pub fn match_count(&self) -> usize {
        self.matches.read().len()
    }

    fn slot(&self, match_id: &str) -> Result<Arc<Mutex<MatchSlot>>, EngineError> {
        self.matches
            .read()
            .get(match_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(match_id.to_string()))
    }

    /// Apply `op` under the match lock; on success bump activity and push a
    /// snapshot before the lock is released, so pushes keep mutation order.
    fn mutate<T>(
        &self,
        match_id: &str,
        op: impl FnOnce(&mut MatchState) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let slot = self.slot(match_id)?;
        let mut slot = slot.lock();
        if slot.closed {
            return Err(EngineError::NotFound(match_id.to_string()));
        }

        let value = match op(&mut slot.state) {
            Ok(value) => value,
            Err(e) => {
                debug!("Match {}: rejected: {}", match_id, e);
                return Err(e);
            }
        };
        slot.last_activity = Instant::now();
        slot.emit();
        Ok(value)
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn validate_match_id(id: MatchId) -> Result<MatchId, EngineError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid_input("match id must not be empty"));
    }
    if trimmed.len() > MAX_MATCH_ID_LEN
        || !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EngineError::invalid_input(
            "match id must be at most 64 characters of [A-Za-z0-9_-]",
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tokio::sync::broadcast::error::TryRecvError;
    use crate::game::moves::Outcome;
    use crate::game::state::MatchStatus;

    fn started(engine: &MatchEngine) -> MatchId {
        let id = engine.create_match("Alice").unwrap();
        engine.join_match(&id, "Bob").unwrap();
        id
    }

    #[test]
    fn test_create_and_join() {
        let engine = MatchEngine::default();
        let id = engine.create_match("Alice").unwrap();
        assert_eq!(engine.match_count(), 1);

        let snapshot = engine.get_snapshot(&id).unwrap();
        assert_eq!(snapshot.status, MatchStatus::WaitingForPlayers);
        assert_eq!(snapshot.seat1_name.as_deref(), Some("Alice"));
        assert_eq!(snapshot.seat2_name, None);

        assert_eq!(engine.join_match(&id, "Bob").unwrap(), Seat::Seat2);
        assert_eq!(engine.get_snapshot(&id).unwrap().status, MatchStatus::AwaitingChoices);
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let engine = MatchEngine::default();
        assert!(matches!(engine.create_match(""), Err(EngineError::InvalidInput(_))));
        assert!(matches!(
            engine.create_match_with("Alice", MatchOptions { win_threshold: Some(0), ..Default::default() }),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.create_match_with("Alice", MatchOptions { match_id: Some("  ".into()), ..Default::default() }),
            Err(EngineError::InvalidInput(_))
        ));
        assert_eq!(engine.match_count(), 0);
    }

    #[test]
    fn test_caller_supplied_id() {
        let engine = MatchEngine::default();
        let options = MatchOptions { match_id: Some("table-7".into()), win_threshold: Some(5) };
        let id = engine.create_match_with("Alice", options.clone()).unwrap();
        assert_eq!(id, "table-7");
        assert_eq!(engine.get_snapshot(&id).unwrap().win_threshold, 5);

        assert!(matches!(
            engine.create_match_with("Carol", options),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_join_errors() {
        let engine = MatchEngine::default();
        assert_eq!(
            engine.join_match("missing", "Bob"),
            Err(EngineError::NotFound("missing".to_string()))
        );

        let id = engine.create_match("Alice").unwrap();
        assert!(matches!(engine.join_match(&id, ""), Err(EngineError::InvalidInput(_))));
        engine.join_match(&id, "Bob").unwrap();
        assert_eq!(engine.join_match(&id, "Carol"), Err(EngineError::MatchFull));
    }

    #[test]
    fn test_scenario_a_single_round() {
        let engine = MatchEngine::default();
        let id = started(&engine);

        engine.submit_choice(&id, Seat::Seat1, Move::Rock).unwrap();
        let snapshot = engine.get_snapshot(&id).unwrap();
        assert!(snapshot.seat1_submitted);
        assert!(!snapshot.seat2_submitted);
        assert_eq!(snapshot.status, MatchStatus::AwaitingChoices);

        engine.submit_choice(&id, Seat::Seat2, Move::Scissors).unwrap();
        let snapshot = engine.get_snapshot(&id).unwrap();
        assert_eq!(snapshot.seat1_score, 1);
        assert_eq!(snapshot.seat2_score, 0);
        assert!(!snapshot.seat1_submitted);
        assert!(!snapshot.seat2_submitted);
        assert_eq!(snapshot.status, MatchStatus::AwaitingChoices);
    }

    #[test]
    fn test_scenario_b_match_to_three() {
        let engine = MatchEngine::default();
        let id = started(&engine);

        for _ in 0..2 {
            engine.submit_choice(&id, Seat::Seat1, Move::Rock).unwrap();
            engine.submit_choice(&id, Seat::Seat2, Move::Scissors).unwrap();
        }
        engine.submit_choice(&id, Seat::Seat1, Move::Rock).unwrap();
        let result = engine.submit_choice(&id, Seat::Seat2, Move::Scissors).unwrap();
        assert!(matches!(result, SubmitResult::Resolved(_)));

        let snapshot = engine.get_snapshot(&id).unwrap();
        assert_eq!(snapshot.status, MatchStatus::MatchFinished);
        assert_eq!(snapshot.winner, Some(Outcome::Seat1));
        assert_eq!(snapshot.seat1_score, 3);
    }

    #[test]
    fn test_scenario_c_duplicate_submission() {
        let engine = MatchEngine::default();
        let id = started(&engine);

        engine.submit_choice(&id, Seat::Seat1, Move::Paper).unwrap();
        let before = engine.get_snapshot(&id).unwrap();
        assert_eq!(
            engine.submit_choice(&id, Seat::Seat1, Move::Paper),
            Err(EngineError::DuplicateSubmission(Seat::Seat1))
        );
        assert_eq!(engine.get_snapshot(&id).unwrap(), before);
    }

    #[test]
    fn test_scenario_d_unknown_match() {
        let engine = MatchEngine::default();
        assert_eq!(
            engine.submit_choice("never-created", Seat::Seat1, Move::Rock),
            Err(EngineError::NotFound("never-created".to_string()))
        );
        assert!(engine.get_snapshot("never-created").is_err());
        assert!(engine.subscribe("never-created").is_err());
    }

    #[test]
    fn test_scenario_e_concurrent_submissions() {
        for _ in 0..50 {
            let engine = Arc::new(MatchEngine::default());
            let id = started(&engine);
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = [(Seat::Seat1, Move::Paper), (Seat::Seat2, Move::Rock)]
                .into_iter()
                .map(|(seat, choice)| {
                    let engine = engine.clone();
                    let barrier = barrier.clone();
                    let id = id.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        engine.submit_choice(&id, seat, choice).unwrap()
                    })
                })
                .collect();

            let results: Vec<SubmitResult> = handles.into_iter()
                .map(|h| h.join().unwrap())
                .collect();
            let resolutions = results.iter()
                .filter(|r| matches!(r, SubmitResult::Resolved(_)))
                .count();
            assert_eq!(resolutions, 1);

            let snapshot = engine.get_snapshot(&id).unwrap();
            assert_eq!(snapshot.seat1_score, 1);
            assert_eq!(snapshot.seat2_score, 0);
            assert_eq!(snapshot.round, 2);
            assert!(!snapshot.seat1_submitted && !snapshot.seat2_submitted);
        }
    }

    #[test]
    fn test_snapshot_idempotent() {
        let engine = MatchEngine::default();
        let id = started(&engine);
        engine.submit_choice(&id, Seat::Seat2, Move::Rock).unwrap();
        assert_eq!(engine.get_snapshot(&id).unwrap(), engine.get_snapshot(&id).unwrap());
    }

    #[test]
    fn test_subscribers_receive_each_change() {
        let engine = MatchEngine::default();
        let id = engine.create_match("Alice").unwrap();
        let mut rx = engine.subscribe(&id).unwrap();

        engine.join_match(&id, "Bob").unwrap();
        engine.submit_choice(&id, Seat::Seat1, Move::Rock).unwrap();
        engine.submit_choice(&id, Seat::Seat2, Move::Rock).unwrap();

        let joined = rx.try_recv().unwrap();
        assert_eq!(joined.status, MatchStatus::AwaitingChoices);
        let submitted = rx.try_recv().unwrap();
        assert!(submitted.seat1_submitted);
        let resolved = rx.try_recv().unwrap();
        assert_eq!(resolved.last_round.map(|r| r.outcome), Some(Outcome::Tie));
        assert!(!resolved.seat1_submitted);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_rejected_operation_emits_nothing() {
        let engine = MatchEngine::default();
        let id = started(&engine);
        engine.submit_choice(&id, Seat::Seat1, Move::Rock).unwrap();

        let mut rx = engine.subscribe(&id).unwrap();
        assert!(engine.submit_choice(&id, Seat::Seat1, Move::Paper).is_err());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_close_match() {
        let engine = MatchEngine::default();
        let id = started(&engine);
        let mut rx = engine.subscribe(&id).unwrap();

        engine.close_match(&id).unwrap();
        assert_eq!(engine.match_count(), 0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
        assert!(matches!(engine.close_match(&id), Err(EngineError::NotFound(_))));
        assert!(matches!(
            engine.submit_choice(&id, Seat::Seat1, Move::Rock),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_sweep_idle_requires_no_connected_seat() {
        let engine = MatchEngine::new(EngineConfig {
            idle_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        let id = started(&engine);
        let later = Instant::now() + Duration::from_secs(120);

        assert!(engine.sweep_idle(later).is_empty());

        engine.disconnect_seat(&id, Seat::Seat1).unwrap();
        assert!(engine.sweep_idle(later).is_empty());

        engine.disconnect_seat(&id, Seat::Seat2).unwrap();
        assert!(engine.sweep_idle(Instant::now()).is_empty());
        assert_eq!(engine.sweep_idle(later), vec![id.clone()]);
        assert_eq!(engine.match_count(), 0);
    }

    #[test]
    fn test_reconnect_keeps_match_alive() {
        let engine = MatchEngine::new(EngineConfig {
            idle_timeout: Duration::ZERO,
            ..Default::default()
        });
        let id = engine.create_match("Alice").unwrap();
        engine.disconnect_seat(&id, Seat::Seat1).unwrap();
        engine.reconnect_seat(&id, Seat::Seat1).unwrap();
        assert!(engine.sweep_idle(Instant::now()).is_empty());

        assert_eq!(
            engine.reconnect_seat(&id, Seat::Seat1),
            Err(EngineError::SeatTaken(Seat::Seat1))
        );
        assert_eq!(
            engine.reconnect_seat(&id, Seat::Seat2),
            Err(EngineError::SeatNotOccupied(Seat::Seat2))
        );
    }

    #[test]
    fn test_matches_are_independent() {
        let engine = MatchEngine::default();
        let first = started(&engine);
        let second = started(&engine);
        assert_ne!(first, second);

        engine.submit_choice(&first, Seat::Seat1, Move::Rock).unwrap();
        assert!(!engine.get_snapshot(&second).unwrap().seat1_submitted);
    }

    #[test]
    fn test_config_sanitized() {
        let engine = MatchEngine::new(EngineConfig {
            default_win_threshold: 0,
            snapshot_buffer: 0,
            ..Default::default()
        });
        assert_eq!(engine.config().default_win_threshold, 3);
        assert_eq!(engine.config().snapshot_buffer, 1);
    }

    #[test]
    fn test_oversized_snapshot_buffer_is_capped() {
        let engine = MatchEngine::new(EngineConfig {
            snapshot_buffer: usize::MAX,
            ..Default::default()
        });
        assert_eq!(engine.config().snapshot_buffer, MAX_SNAPSHOT_BUFFER);

        let id = engine.create_match("Alice").unwrap();
        assert!(engine.subscribe(&id).is_ok());
    }
}
