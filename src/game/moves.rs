//! Moves and Outcomes
//!
//! The beat relation is a 3-cycle: Rock > Scissors > Paper > Rock.

use serde::{Serialize, Deserialize};

use crate::game::state::Seat;

/// A player's choice for one round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Move {
    /// Beats scissors.
    Rock,
    /// Beats rock.
    Paper,
    /// Beats paper.
    Scissors,
}

impl Move {
    /// All moves, in declaration order.
    pub const ALL: [Move; 3] = [Move::Rock, Move::Paper, Move::Scissors];

    /// The move this one defeats.
    pub fn defeats(self) -> Move {
        match self {
            Move::Rock => Move::Scissors,
            Move::Paper => Move::Rock,
            Move::Scissors => Move::Paper,
        }
    }

    /// Check if this move wins against `other`.
    #[inline]
    pub fn beats(self, other: Move) -> bool {
        self.defeats() == other
    }
}

/// Outcome of a round, or of a whole match once it finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Seat 1 won.
    Seat1,
    /// Seat 2 won.
    Seat2,
    /// Equal moves, or equal scores at the threshold.
    Tie,
}

impl Outcome {
    /// Winning seat, if decisive.
    pub fn winner(self) -> Option<Seat> {
        match self {
            Outcome::Seat1 => Some(Seat::Seat1),
            Outcome::Seat2 => Some(Seat::Seat2),
            Outcome::Tie => None,
        }
    }

    /// Outcome won by `seat`.
    pub fn from_seat(seat: Seat) -> Self {
        match seat {
            Seat::Seat1 => Outcome::Seat1,
            Seat::Seat2 => Outcome::Seat2,
        }
    }
}

/// Compare the two seats' moves.
pub fn resolve(seat1: Move, seat2: Move) -> Outcome {
    if seat1.beats(seat2) {
        Outcome::from_seat(Seat::Seat1)
    } else if seat2.beats(seat1) {
        Outcome::from_seat(Seat::Seat2)
    } else {
        Outcome::Tie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_move() -> impl Strategy<Value = Move> {
        prop_oneof![Just(Move::Rock), Just(Move::Paper), Just(Move::Scissors)]
    }

    #[test]
    fn test_beat_cycle() {
        assert!(Move::Rock.beats(Move::Scissors));
        assert!(Move::Scissors.beats(Move::Paper));
        assert!(Move::Paper.beats(Move::Rock));

        assert!(!Move::Scissors.beats(Move::Rock));
        assert!(!Move::Paper.beats(Move::Scissors));
        assert!(!Move::Rock.beats(Move::Paper));
    }

    #[test]
    fn test_equal_moves_tie() {
        for m in Move::ALL {
            assert!(!m.beats(m));
            assert_eq!(resolve(m, m), Outcome::Tie);
            assert_eq!(resolve(m, m).winner(), None);
        }
    }

    #[test]
    fn test_each_move_beats_exactly_one() {
        for m in Move::ALL {
            let wins = Move::ALL.iter().filter(|o| m.beats(**o)).count();
            assert_eq!(wins, 1, "{:?} should beat exactly one move", m);
        }
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&Move::Scissors).unwrap(), "\"scissors\"");
        assert_eq!(serde_json::to_string(&Outcome::Tie).unwrap(), "\"tie\"");
        let parsed: Move = serde_json::from_str("\"rock\"").unwrap();
        assert_eq!(parsed, Move::Rock);
    }

    proptest! {
        #[test]
        fn prop_resolution_is_symmetric(a in any_move(), b in any_move()) {
            let forward = resolve(a, b);
            let swapped = resolve(b, a);
            let expected = match forward {
                Outcome::Seat1 => Outcome::Seat2,
                Outcome::Seat2 => Outcome::Seat1,
                Outcome::Tie => Outcome::Tie,
            };
            prop_assert_eq!(swapped, expected);
        }

        #[test]
        fn prop_tie_iff_equal(a in any_move(), b in any_move()) {
            prop_assert_eq!(resolve(a, b) == Outcome::Tie, a == b);
        }
    }
}
