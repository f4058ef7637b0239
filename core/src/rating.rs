use serde::{Deserialize, Serialize};

/// Mean of the Gaussian prior over a new player's skill.
pub const PRIOR_MU: f64 = 25.0;

/// Standard deviation of the Gaussian prior over a new player's skill.
pub const PRIOR_SIGMA: f64 = 25.0 / 3.0;

/// A player's skill belief: posterior mean `mu` and uncertainty `sigma`.
///
/// This is a plain value pair with no identity. Persistence is a function
/// from a player id to this pair, and the engine is the only writer.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Rating {
    pub mu: f64,
    pub sigma: f64,
}

impl Default for Rating {
    fn default() -> Self {
        Self {
            mu: PRIOR_MU,
            sigma: PRIOR_SIGMA,
        }
    }
}

impl Rating {
    pub fn new(mu: f64, sigma: f64) -> Self {
        Self { mu, sigma }
    }

    /// Conservative display score, `(mu - 3 * sigma) * 100`.
    ///
    /// Three standard deviations below the mean corresponds to the 99.7%
    /// confidence bound, so a player's score only grows as the system
    /// becomes sure of their skill.
    pub fn score(&self) -> i64 {
        ((self.mu - 3.0 * self.sigma) * 100.0).round() as i64
    }
}
