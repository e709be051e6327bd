//! Seat ring management for a single table.
//!
//! This module implements:
//! - Seat: one chair with occupancy and activity flags
//! - SeatManager: the operations the table engine needs from a seat ring
//! - SeatRing: the standard fixed-size implementation
//!
//! Position pointers (dealer / small blind / big blind) rotate by physical
//! seat order, never by player insertion order. All mutating operations either
//! fully apply or leave the ring untouched, which is what lets the engine
//! retry a failed hand open without repairing seat state first.

use rand::seq::SliceRandom;
use rand::thread_rng;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::table::CompetitionRule;

/// Errors produced by seat ring operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeatError {
    #[error("seat is out of range")]
    SeatOutOfRange,

    #[error("seat is already occupied")]
    SeatUnavailable,

    #[error("player is already seated")]
    PlayerAlreadySeated,

    #[error("no empty seats available")]
    NoEmptySeats,

    #[error("player not found in seat ring")]
    PlayerNotFound,

    #[error("not enough active players to assign positions")]
    NotEnoughActivePlayers,

    #[error("positions have not been initialized")]
    PositionsNotInitialized,
}

/// One chair in the ring.
#[derive(Debug, Clone, Default)]
pub struct Seat {
    pub player_id: Option<String>,
    pub is_in: bool,
    pub has_chips: bool,
    pub is_sitting_out: bool,
}

impl Seat {
    pub fn is_occupied(&self) -> bool {
        self.player_id.is_some()
    }

    /// A seat participates in position rotation only while its occupant has
    /// joined, still has chips and is not sitting out.
    pub fn is_active(&self) -> bool {
        self.is_occupied() && self.is_in && self.has_chips && !self.is_sitting_out
    }

    fn clear(&mut self) {
        *self = Seat::default();
    }
}

/// Operations the table engine requires from a seat ring.
///
/// This is a trait so tests can wrap the standard ring with failure injection
/// (e.g. a rotation that fails transiently while verifying the open-game
/// retry loop).
pub trait SeatManager: Send {
    fn assign_seats(&mut self, requests: &HashMap<String, usize>) -> Result<(), SeatError>;
    fn random_assign_seats(&mut self, player_ids: &[String]) -> Result<(), SeatError>;
    fn join_players(&mut self, player_ids: &[String]) -> Result<(), SeatError>;
    fn update_player_has_chips(&mut self, player_id: &str, has_chips: bool)
        -> Result<(), SeatError>;
    fn is_player_active(&self, player_id: &str) -> Result<bool, SeatError>;
    fn remove_seats(&mut self, player_ids: &[String]) -> Result<(), SeatError>;
    fn is_init_positions(&self) -> bool;
    fn init_positions(&mut self, random_dealer: bool) -> Result<(), SeatError>;
    fn rotate_positions(&mut self) -> Result<(), SeatError>;
    fn current_dealer_seat(&self) -> Option<usize>;
    fn current_sb_seat(&self) -> Option<usize>;
    fn current_bb_seat(&self) -> Option<usize>;
    fn seat_of(&self, player_id: &str) -> Result<usize, SeatError>;
    fn seats(&self) -> &[Seat];
}

/// Standard fixed-size seat ring.
pub struct SeatRing {
    seats: Vec<Seat>,
    rule: CompetitionRule,
    dealer_seat: Option<usize>,
    sb_seat: Option<usize>,
    bb_seat: Option<usize>,
    initialized: bool,
}

impl SeatRing {
    pub fn new(seat_count: usize, rule: CompetitionRule) -> Self {
        Self {
            seats: vec![Seat::default(); seat_count],
            rule,
            dealer_seat: None,
            sb_seat: None,
            bb_seat: None,
            initialized: false,
        }
    }

    fn find_seat(&self, player_id: &str) -> Option<usize> {
        self.seats
            .iter()
            .position(|s| s.player_id.as_deref() == Some(player_id))
    }

    fn active_seat_ids(&self) -> Vec<usize> {
        self.seats
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active())
            .map(|(i, _)| i)
            .collect()
    }

    /// First active seat strictly clockwise of `from`, wrapping around.
    fn next_active_clockwise(&self, from: usize) -> Option<usize> {
        let n = self.seats.len();
        (1..=n)
            .map(|offset| (from + offset) % n)
            .find(|&id| self.seats[id].is_active())
    }

    /// First active seat strictly counter-clockwise of `from`, wrapping around.
    fn next_active_counter_clockwise(&self, from: usize) -> Option<usize> {
        let n = self.seats.len();
        (1..=n)
            .map(|offset| (from + n - offset) % n)
            .find(|&id| self.seats[id].is_active())
    }

    /// Derive SB and dealer backwards from a fixed BB seat. With exactly two
    /// active seats the dealer doubles as the small blind.
    fn derive_from_bb(&self, bb: usize, active_count: usize) -> (usize, usize) {
        if active_count == 2 {
            let other = self
                .next_active_clockwise(bb)
                .unwrap_or(bb);
            (other, other)
        } else {
            let sb = self
                .next_active_counter_clockwise(bb)
                .unwrap_or(bb);
            let dealer = self
                .next_active_counter_clockwise(sb)
                .unwrap_or(sb);
            (dealer, sb)
        }
    }
}

impl SeatManager for SeatRing {
    fn assign_seats(&mut self, requests: &HashMap<String, usize>) -> Result<(), SeatError> {
        let mut claimed = HashSet::new();
        for (player_id, &seat_id) in requests {
            if seat_id >= self.seats.len() {
                return Err(SeatError::SeatOutOfRange);
            }
            if self.seats[seat_id].is_occupied() || !claimed.insert(seat_id) {
                return Err(SeatError::SeatUnavailable);
            }
            if self.find_seat(player_id).is_some() {
                return Err(SeatError::PlayerAlreadySeated);
            }
        }

        for (player_id, &seat_id) in requests {
            let seat = &mut self.seats[seat_id];
            seat.player_id = Some(player_id.clone());
            seat.is_in = false;
            seat.has_chips = true;
            seat.is_sitting_out = false;
        }
        Ok(())
    }

    fn random_assign_seats(&mut self, player_ids: &[String]) -> Result<(), SeatError> {
        for player_id in player_ids {
            if self.find_seat(player_id).is_some() {
                return Err(SeatError::PlayerAlreadySeated);
            }
        }

        let mut empty: Vec<usize> = self
            .seats
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_occupied())
            .map(|(i, _)| i)
            .collect();
        if empty.len() < player_ids.len() {
            return Err(SeatError::NoEmptySeats);
        }

        empty.shuffle(&mut thread_rng());
        for (player_id, &seat_id) in player_ids.iter().zip(empty.iter()) {
            let seat = &mut self.seats[seat_id];
            seat.player_id = Some(player_id.clone());
            seat.is_in = false;
            seat.has_chips = true;
            seat.is_sitting_out = false;
        }
        Ok(())
    }

    fn join_players(&mut self, player_ids: &[String]) -> Result<(), SeatError> {
        let mut seat_ids = Vec::with_capacity(player_ids.len());
        for player_id in player_ids {
            seat_ids.push(self.find_seat(player_id).ok_or(SeatError::PlayerNotFound)?);
        }
        for seat_id in seat_ids {
            self.seats[seat_id].is_in = true;
        }
        Ok(())
    }

    fn update_player_has_chips(
        &mut self,
        player_id: &str,
        has_chips: bool,
    ) -> Result<(), SeatError> {
        let seat_id = self.find_seat(player_id).ok_or(SeatError::PlayerNotFound)?;
        self.seats[seat_id].has_chips = has_chips;
        Ok(())
    }

    fn is_player_active(&self, player_id: &str) -> Result<bool, SeatError> {
        let seat_id = self.find_seat(player_id).ok_or(SeatError::PlayerNotFound)?;
        Ok(self.seats[seat_id].is_active())
    }

    fn remove_seats(&mut self, player_ids: &[String]) -> Result<(), SeatError> {
        for player_id in player_ids {
            if let Some(seat_id) = self.find_seat(player_id) {
                self.seats[seat_id].clear();
            }
        }
        Ok(())
    }

    fn is_init_positions(&self) -> bool {
        self.initialized
    }

    fn init_positions(&mut self, random_dealer: bool) -> Result<(), SeatError> {
        let actives = self.active_seat_ids();
        if actives.len() < 2 {
            return Err(SeatError::NotEnoughActivePlayers);
        }

        let dealer = if random_dealer {
            *actives
                .choose(&mut thread_rng())
                .ok_or(SeatError::NotEnoughActivePlayers)?
        } else {
            actives[0]
        };

        if self.rule == CompetitionRule::ShortDeck {
            self.dealer_seat = Some(dealer);
            self.sb_seat = None;
            self.bb_seat = None;
        } else if actives.len() == 2 {
            let bb = self
                .next_active_clockwise(dealer)
                .ok_or(SeatError::NotEnoughActivePlayers)?;
            self.dealer_seat = Some(dealer);
            self.sb_seat = Some(dealer);
            self.bb_seat = Some(bb);
        } else {
            let sb = self
                .next_active_clockwise(dealer)
                .ok_or(SeatError::NotEnoughActivePlayers)?;
            let bb = self
                .next_active_clockwise(sb)
                .ok_or(SeatError::NotEnoughActivePlayers)?;
            self.dealer_seat = Some(dealer);
            self.sb_seat = Some(sb);
            self.bb_seat = Some(bb);
        }

        self.initialized = true;
        log::debug!(
            "seat ring initialized: dealer={:?} sb={:?} bb={:?}",
            self.dealer_seat,
            self.sb_seat,
            self.bb_seat
        );
        Ok(())
    }

    fn rotate_positions(&mut self) -> Result<(), SeatError> {
        if !self.initialized {
            return Err(SeatError::PositionsNotInitialized);
        }

        let actives = self.active_seat_ids();
        if actives.len() < 2 {
            return Err(SeatError::NotEnoughActivePlayers);
        }

        if self.rule == CompetitionRule::ShortDeck {
            let from = self.dealer_seat.ok_or(SeatError::PositionsNotInitialized)?;
            let dealer = self
                .next_active_clockwise(from)
                .ok_or(SeatError::NotEnoughActivePlayers)?;
            self.dealer_seat = Some(dealer);
            return Ok(());
        }

        // The big blind always moves forward to the next live seat; SB and the
        // button are derived backwards from it. The button can therefore skip
        // seats that busted, but nobody ever skips their big blind.
        let prior_bb = self.bb_seat.ok_or(SeatError::PositionsNotInitialized)?;
        let bb = self
            .next_active_clockwise(prior_bb)
            .ok_or(SeatError::NotEnoughActivePlayers)?;
        let (dealer, sb) = self.derive_from_bb(bb, actives.len());

        self.dealer_seat = Some(dealer);
        self.sb_seat = Some(sb);
        self.bb_seat = Some(bb);
        log::debug!(
            "seat ring rotated: dealer={:?} sb={:?} bb={:?}",
            self.dealer_seat,
            self.sb_seat,
            self.bb_seat
        );
        Ok(())
    }

    fn current_dealer_seat(&self) -> Option<usize> {
        self.dealer_seat
    }

    fn current_sb_seat(&self) -> Option<usize> {
        self.sb_seat
    }

    fn current_bb_seat(&self) -> Option<usize> {
        self.bb_seat
    }

    fn seat_of(&self, player_id: &str) -> Result<usize, SeatError> {
        self.find_seat(player_id).ok_or(SeatError::PlayerNotFound)
    }

    fn seats(&self) -> &[Seat] {
        &self.seats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(players: &[(&str, usize)]) -> SeatRing {
        let mut ring = SeatRing::new(9, CompetitionRule::Default);
        let requests: HashMap<String, usize> = players
            .iter()
            .map(|(id, seat)| (id.to_string(), *seat))
            .collect();
        ring.assign_seats(&requests).unwrap();
        let ids: Vec<String> = players.iter().map(|(id, _)| id.to_string()).collect();
        ring.join_players(&ids).unwrap();
        ring
    }

    #[test]
    fn assign_rejects_occupied_seat() {
        let mut ring = ring_with(&[("alice", 2)]);
        let mut requests = HashMap::new();
        requests.insert("bob".to_string(), 2);
        assert_eq!(ring.assign_seats(&requests), Err(SeatError::SeatUnavailable));
    }

    #[test]
    fn assign_rejects_double_seating() {
        let mut ring = ring_with(&[("alice", 2)]);
        let mut requests = HashMap::new();
        requests.insert("alice".to_string(), 4);
        assert_eq!(
            ring.assign_seats(&requests),
            Err(SeatError::PlayerAlreadySeated)
        );
    }

    #[test]
    fn assign_rejects_out_of_range() {
        let mut ring = SeatRing::new(6, CompetitionRule::Default);
        let mut requests = HashMap::new();
        requests.insert("alice".to_string(), 6);
        assert_eq!(ring.assign_seats(&requests), Err(SeatError::SeatOutOfRange));
    }

    #[test]
    fn random_assign_fails_when_full() {
        let mut ring = SeatRing::new(2, CompetitionRule::Default);
        ring.random_assign_seats(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(
            ring.random_assign_seats(&["c".to_string()]),
            Err(SeatError::NoEmptySeats)
        );
    }

    #[test]
    fn player_is_active_only_after_join_with_chips() {
        let mut ring = SeatRing::new(9, CompetitionRule::Default);
        let mut requests = HashMap::new();
        requests.insert("alice".to_string(), 0);
        ring.assign_seats(&requests).unwrap();
        assert!(!ring.is_player_active("alice").unwrap());

        ring.join_players(&["alice".to_string()]).unwrap();
        assert!(ring.is_player_active("alice").unwrap());

        ring.update_player_has_chips("alice", false).unwrap();
        assert!(!ring.is_player_active("alice").unwrap());
    }

    #[test]
    fn init_positions_requires_two_active_players() {
        let mut ring = ring_with(&[("alice", 0)]);
        assert_eq!(
            ring.init_positions(false),
            Err(SeatError::NotEnoughActivePlayers)
        );
        assert!(!ring.is_init_positions());
    }

    #[test]
    fn init_positions_heads_up_dealer_is_sb() {
        let mut ring = ring_with(&[("alice", 1), ("bob", 5)]);
        ring.init_positions(false).unwrap();
        assert_eq!(ring.current_dealer_seat(), Some(1));
        assert_eq!(ring.current_sb_seat(), Some(1));
        assert_eq!(ring.current_bb_seat(), Some(5));
    }

    #[test]
    fn init_positions_three_handed() {
        let mut ring = ring_with(&[("alice", 1), ("bob", 5), ("carol", 8)]);
        ring.init_positions(false).unwrap();
        assert_eq!(ring.current_dealer_seat(), Some(1));
        assert_eq!(ring.current_sb_seat(), Some(5));
        assert_eq!(ring.current_bb_seat(), Some(8));
    }

    #[test]
    fn rotation_advances_clockwise_by_seat_order() {
        let mut ring = ring_with(&[("alice", 1), ("bob", 5), ("carol", 8)]);
        ring.init_positions(false).unwrap();

        ring.rotate_positions().unwrap();
        assert_eq!(ring.current_dealer_seat(), Some(5));
        assert_eq!(ring.current_sb_seat(), Some(8));
        assert_eq!(ring.current_bb_seat(), Some(1));

        ring.rotate_positions().unwrap();
        assert_eq!(ring.current_dealer_seat(), Some(8));
        assert_eq!(ring.current_sb_seat(), Some(1));
        assert_eq!(ring.current_bb_seat(), Some(5));
    }

    #[test]
    fn rotation_skips_busted_seat_without_skipping_bb() {
        let mut ring = ring_with(&[("alice", 1), ("bob", 3), ("carol", 5), ("dave", 7)]);
        ring.init_positions(false).unwrap();
        // dealer=1 sb=3 bb=5; seat 7 busts during the hand.
        ring.update_player_has_chips("dave", false).unwrap();

        ring.rotate_positions().unwrap();
        // BB advances past the busted seat 7 to seat 1.
        assert_eq!(ring.current_bb_seat(), Some(1));
        assert_eq!(ring.current_sb_seat(), Some(5));
        assert_eq!(ring.current_dealer_seat(), Some(3));
    }

    #[test]
    fn rotation_collapses_to_heads_up() {
        let mut ring = ring_with(&[("alice", 0), ("bob", 3), ("carol", 6)]);
        ring.init_positions(false).unwrap();
        ring.update_player_has_chips("alice", false).unwrap();

        ring.rotate_positions().unwrap();
        // bb was 6, advances to 3; remaining active seat 6 is dealer and sb.
        assert_eq!(ring.current_bb_seat(), Some(3));
        assert_eq!(ring.current_sb_seat(), Some(6));
        assert_eq!(ring.current_dealer_seat(), Some(6));
    }

    #[test]
    fn rotate_before_init_fails() {
        let mut ring = ring_with(&[("alice", 0), ("bob", 1)]);
        assert_eq!(
            ring.rotate_positions(),
            Err(SeatError::PositionsNotInitialized)
        );
    }

    #[test]
    fn remove_clears_seat_metadata() {
        let mut ring = ring_with(&[("alice", 0), ("bob", 1)]);
        ring.remove_seats(&["alice".to_string()]).unwrap();
        assert_eq!(ring.seat_of("alice"), Err(SeatError::PlayerNotFound));
        assert!(!ring.seats()[0].is_occupied());
        // Removing an unknown player is a no-op.
        ring.remove_seats(&["zed".to_string()]).unwrap();
    }

    #[test]
    fn short_deck_tracks_dealer_only() {
        let mut ring = SeatRing::new(6, CompetitionRule::ShortDeck);
        ring.random_assign_seats(&["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap();
        ring.join_players(&["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap();
        ring.init_positions(false).unwrap();
        assert!(ring.current_dealer_seat().is_some());
        assert_eq!(ring.current_sb_seat(), None);
        assert_eq!(ring.current_bb_seat(), None);

        let before = ring.current_dealer_seat();
        ring.rotate_positions().unwrap();
        assert_ne!(ring.current_dealer_seat(), before);
    }
}
