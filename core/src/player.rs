use crate::rating::Rating;
use chrono::NaiveDate;
use derive_more::{Display, From, FromStr, Into};
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
pub struct PlayerId(i64);

/// Gender recorded on a player profile.
///
/// Only an explicit `Male` or `Female` participates in the adjustment
/// policy; `Unknown` triggers no rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn is_male(self) -> bool {
        self == Self::Male
    }

    pub fn is_female(self) -> bool {
        self == Self::Female
    }
}

/// A stored player. Created by the surrounding application with prior
/// ratings; the engine mutates only the rating pair and never deletes.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub gender: Gender,
    pub rating: Rating,
}

/// Per-player win/loss aggregate, computed on demand from the match store.
///
/// Kept as a separate value composed beside a [`Player`] rather than
/// decorated onto it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlayerStats {
    pub wins: u32,
    pub losses: u32,
    pub last_match: Option<NaiveDate>,
}
