use crate::{
    error::{EngineError, Result},
    player::PlayerId,
};
use chrono::NaiveDate;
use derive_more::{Display, From, FromStr, Into};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    From,
    FromStr,
    Into,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct MatchId(i64);

/// Outcome of a match from side A's perspective. Side B's outcome is the
/// complement; draws do not exist in this system.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Deserialize, Serialize)]
pub enum Outcome {
    #[display("win")]
    Win,
    #[display("loss")]
    Loss,
}

/// A played match as submitted to the engine: two sides of one or two
/// players each and the games taken by either side.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PlayedMatch {
    pub date: NaiveDate,
    pub side_a: Vec<PlayerId>,
    pub side_b: Vec<PlayerId>,
    pub a_games: u32,
    pub b_games: u32,
}

/// A match as stored, with its record id. History is totally ordered by
/// `(date, id)` ascending and is never reordered.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub played: PlayedMatch,
}

impl PlayedMatch {
    /// Outcome for side A, `sign(a_games - b_games)`.
    pub fn outcome(&self) -> Outcome {
        if self.a_games > self.b_games {
            Outcome::Win
        } else {
            Outcome::Loss
        }
    }

    /// Normalised game differential in `[0, 1]`.
    ///
    /// 0 is the closest possible match, 1 a shutout. Used to scale the
    /// skill-width parameter per match: blowouts carry more information
    /// about the skill gap than nail-biters.
    pub fn suspense(&self) -> f64 {
        let total = self.a_games + self.b_games;
        if total == 0 {
            return 0.0;
        }
        f64::from(self.a_games.abs_diff(self.b_games)) / f64::from(total)
    }

    /// Every participating player, side A first.
    pub fn participants(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.side_a.iter().chain(&self.side_b).copied()
    }

    pub fn is_singles(&self) -> bool {
        self.side_a.len() == 1 && self.side_b.len() == 1
    }

    /// Check the structural invariants before any rating math runs.
    pub fn validate(&self) -> Result<()> {
        if self.side_a.len() != self.side_b.len() {
            return Err(EngineError::InvalidMatch(format!(
                "sides must be the same size ({} vs {})",
                self.side_a.len(),
                self.side_b.len()
            )));
        }
        if self.side_a.is_empty() || self.side_a.len() > 2 {
            return Err(EngineError::InvalidMatch(format!(
                "sides must have one or two players, not {}",
                self.side_a.len()
            )));
        }
        if let Some(dup) = self.participants().duplicates().next() {
            return Err(EngineError::InvalidMatch(format!(
                "player {dup} appears more than once"
            )));
        }
        if self.a_games == self.b_games {
            return Err(EngineError::InvalidMatch(format!(
                "draws are not allowed ({} - {})",
                self.a_games, self.b_games
            )));
        }
        Ok(())
    }
}
