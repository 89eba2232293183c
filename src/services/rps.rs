//! Pairing game — two-seat rock/paper/scissors per room.
//!
//! DESIGN
//! ======
//! The game is a small state machine owned by the room:
//!
//! ```text
//! Empty --join--> Waiting(1 seated) --join--> Active --both chose--> Revealed
//!   ^                                                                   |
//!   +------------------------- reset / seated player leaves ------------+
//! ```
//!
//! Operations return the events to deliver as `(client_id, event)` pairs and
//! never touch connections themselves; the dispatcher routes them. Seats
//! name live connections, so they are never persisted. Each seat also gets
//! an opaque random token that is the only identity a player learns about
//! its opponent.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::message::ErrorCode;

// =============================================================================
// CHOICES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
}

impl Choice {
    #[must_use]
    pub fn beats(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::Rock, Self::Scissors) | (Self::Scissors, Self::Paper) | (Self::Paper, Self::Rock)
        )
    }
}

impl FromStr for Choice {
    type Err = RpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rock" => Ok(Self::Rock),
            "paper" => Ok(Self::Paper),
            "scissors" => Ok(Self::Scissors),
            other => Err(RpsError::InvalidChoice(other.to_owned())),
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rock => "rock",
            Self::Paper => "paper",
            Self::Scissors => "scissors",
        })
    }
}

/// Winning seat number, or 0 for a tie.
#[must_use]
pub fn winner(player1: Choice, player2: Choice) -> u8 {
    if player1 == player2 {
        0
    } else if player1.beats(player2) {
        1
    } else {
        2
    }
}

fn result_text(winner: u8) -> String {
    match winner {
        0 => "It's a tie!".to_owned(),
        n => format!("Player {n} wins!"),
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpsError {
    #[error("RPS game is full")]
    Full,
    #[error("Invalid choice: {0}")]
    InvalidChoice(String),
    #[error("not seated in the RPS game")]
    NotSeated,
    #[error("RPS game is not accepting choices")]
    NotActive,
}

impl ErrorCode for RpsError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Full => "E_RPS_FULL",
            Self::InvalidChoice(_) => "E_RPS_INVALID_CHOICE",
            Self::NotSeated => "E_RPS_NOT_SEATED",
            Self::NotActive => "E_RPS_NOT_ACTIVE",
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Payload of an outbound `rps_update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RpsEvent {
    Waiting {
        player_number: u8,
    },
    GameStart {
        player_number: u8,
        player_token: Uuid,
        opponent_token: Uuid,
    },
    OpponentChosen {
        your_position: u8,
    },
    Reveal {
        player1_choice: Choice,
        player2_choice: Choice,
        winner: u8,
        result: String,
    },
    Reset {},
    Error {
        message: String,
        code: String,
    },
}

impl RpsEvent {
    #[must_use]
    pub fn error(err: &RpsError) -> Self {
        Self::Error { message: err.to_string(), code: err.error_code().to_owned() }
    }
}

// =============================================================================
// GAME
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Seat {
    client_id: Uuid,
    token: Uuid,
}

/// Per-room game state. Only `choices` and `active` are stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpsGame {
    #[serde(skip)]
    seats: [Option<Seat>; 2],
    #[serde(default)]
    choices: BTreeMap<u8, Choice>,
    #[serde(default)]
    active: bool,
}

impl RpsGame {
    /// Seat number (1 or 2) held by a connection.
    #[must_use]
    pub fn slot_of(&self, client_id: Uuid) -> Option<u8> {
        self.seats
            .iter()
            .position(|seat| seat.is_some_and(|s| s.client_id == client_id))
            .and_then(|idx| u8::try_from(idx + 1).ok())
    }

    /// Connection sitting in seat 1 or 2.
    #[must_use]
    pub fn occupant(&self, slot: u8) -> Option<Uuid> {
        self.seat(slot).map(|s| s.client_id)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn choice(&self, slot: u8) -> Option<Choice> {
        self.choices.get(&slot).copied()
    }

    fn seat(&self, slot: u8) -> Option<Seat> {
        match slot {
            1 => self.seats[0],
            2 => self.seats[1],
            _ => None,
        }
    }

    /// Claim the first free seat.
    ///
    /// Joining while already seated does nothing. Filling the second seat
    /// starts a round.
    ///
    /// # Errors
    ///
    /// Returns `RpsError::Full` when both seats belong to other connections.
    pub fn join(&mut self, client_id: Uuid) -> Result<Vec<(Uuid, RpsEvent)>, RpsError> {
        if self.slot_of(client_id).is_some() {
            return Ok(Vec::new());
        }

        let Some(idx) = self.seats.iter().position(Option::is_none) else {
            return Err(RpsError::Full);
        };
        self.seats[idx] = Some(Seat { client_id, token: Uuid::new_v4() });

        match self.seats {
            [Some(p1), Some(p2)] => {
                self.active = true;
                self.choices.clear();
                info!(player1 = %p1.client_id, player2 = %p2.client_id, "rps game started");
                Ok(vec![
                    (
                        p1.client_id,
                        RpsEvent::GameStart { player_number: 1, player_token: p1.token, opponent_token: p2.token },
                    ),
                    (
                        p2.client_id,
                        RpsEvent::GameStart { player_number: 2, player_token: p2.token, opponent_token: p1.token },
                    ),
                ])
            }
            _ => {
                let player_number = if idx == 0 { 1 } else { 2 };
                Ok(vec![(client_id, RpsEvent::Waiting { player_number })])
            }
        }
    }

    /// Record a seated player's choice; reveal once both have chosen.
    ///
    /// # Errors
    ///
    /// `NotSeated` if the sender holds no seat, `NotActive` outside a round,
    /// `InvalidChoice` for anything but rock, paper or scissors.
    pub fn choose(&mut self, client_id: Uuid, raw: &str) -> Result<Vec<(Uuid, RpsEvent)>, RpsError> {
        let slot = self.slot_of(client_id).ok_or(RpsError::NotSeated)?;
        if !self.active {
            return Err(RpsError::NotActive);
        }
        let choice: Choice = raw.parse()?;

        let first_for_slot = self.choices.insert(slot, choice).is_none();
        let mut events = Vec::new();

        if let (Some(p1), Some(p2)) = (self.choice(1), self.choice(2)) {
            let winner = winner(p1, p2);
            let reveal = RpsEvent::Reveal {
                player1_choice: p1,
                player2_choice: p2,
                winner,
                result: result_text(winner),
            };
            events.extend(
                [1, 2]
                    .into_iter()
                    .filter_map(|n| self.occupant(n))
                    .map(|id| (id, reveal.clone())),
            );
            self.active = false;
            info!(%p1, %p2, winner, "rps round revealed");
        } else if first_for_slot {
            let other = if slot == 1 { 2 } else { 1 };
            if let Some(opponent) = self.occupant(other) {
                events.push((opponent, RpsEvent::OpponentChosen { your_position: other }));
            }
        }
        Ok(events)
    }

    /// Back to the empty state: no seats, no choices, inactive.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Drop a departing connection. A seated player takes the whole game
    /// down with them. Returns whether anything changed.
    pub fn release(&mut self, client_id: Uuid) -> bool {
        if self.slot_of(client_id).is_none() {
            return false;
        }
        self.reset();
        true
    }
}

#[cfg(test)]
#[path = "rps_test.rs"]
mod tests;
