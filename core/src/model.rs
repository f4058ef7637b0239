use crate::{
    error::{EngineError, Result},
    rating::{Rating, PRIOR_MU, PRIOR_SIGMA},
};
use serde::{Deserialize, Serialize};

/// Hard lower bound on any posterior sigma. An update that would land
/// below this refuses instead of persisting a degenerate belief.
pub const SIGMA_FLOOR: f64 = 1e-4;

/// The probabilistic rating environment: global parameters of the skill
/// model, immutable for the lifetime of the engine.
///
/// A per-match variant with a narrower skill width is derived with
/// [`SkillModel::with_beta`]; everything else stays shared.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct SkillModel {
    /// Prior mean skill of an unrated player.
    pub mu: f64,

    /// Prior standard deviation of an unrated player.
    pub sigma: f64,

    /// Skill-to-performance width. Larger beta means match outcomes are
    /// noisier relative to skill differences and ratings move less.
    pub beta: f64,

    /// Additive dynamics, inflating sigma a little on every update so
    /// uncertainty never collapses entirely.
    pub tau: f64,

    /// Probability of a drawn match. Pinned to zero: draws are rejected
    /// upstream, so the truncation margin in the update is always zero.
    pub draw_probability: f64,
}

impl Default for SkillModel {
    fn default() -> Self {
        Self {
            mu: PRIOR_MU,
            sigma: PRIOR_SIGMA,
            beta: PRIOR_SIGMA / 2.0,
            tau: PRIOR_SIGMA / 100.0,
            draw_probability: 0.0,
        }
    }
}

impl SkillModel {
    /// Derive the ephemeral per-match environment with a different skill
    /// width, leaving every other parameter untouched.
    pub fn with_beta(&self, beta: f64) -> Self {
        Self { beta, ..*self }
    }

    /// The rating every player starts from under this environment.
    pub fn prior(&self) -> Rating {
        Rating::new(self.mu, self.sigma)
    }

    /// Update both teams from a decided match.
    ///
    /// `teams` are the two sides in submission order, each with one or two
    /// ratings; `ranks` assigns 0 to the winning side and 1 to the losing
    /// side. Returns the posterior ratings in the same shape.
    ///
    /// The update is the standard Bayesian two-team one: sigma is first
    /// inflated by `tau`, team performance is Gaussian around the summed
    /// means with variance `sum(sigma^2) + n * beta^2`, and the win
    /// likelihood truncates the performance-difference Gaussian at zero.
    /// The resulting moment corrections `v` and `w` shift each player's
    /// mean proportionally to their share of the team variance and shrink
    /// their sigma.
    pub fn rate(&self, teams: [&[Rating]; 2], ranks: [u8; 2]) -> Result<[Vec<Rating>; 2]> {
        for team in teams {
            if team.is_empty() || team.len() > 2 {
                return Err(EngineError::InvalidMatch(format!(
                    "teams must have one or two players, not {}",
                    team.len()
                )));
            }
        }
        let winner = match ranks {
            [0, 1] => 0,
            [1, 0] => 1,
            _ => {
                return Err(EngineError::InvalidMatch(format!(
                    "ranks must be a permutation of [0, 1], not {ranks:?}"
                )))
            }
        };
        let loser = 1 - winner;

        // Dynamics: sigma^2 + tau^2, applied before the match is observed.
        let variances: [Vec<f64>; 2] =
            teams.map(|team| team.iter().map(|r| r.sigma.hypot(self.tau).powi(2)).collect());

        let team_mu: [f64; 2] = [
            teams[0].iter().map(|r| r.mu).sum(),
            teams[1].iter().map(|r| r.mu).sum(),
        ];
        let team_var: [f64; 2] = [variances[0].iter().sum(), variances[1].iter().sum()];

        let players = (teams[0].len() + teams[1].len()) as f64;
        let c_squared = team_var[0] + team_var[1] + players * self.beta * self.beta;
        let c = c_squared.sqrt();

        // Draws are disallowed, so the truncation margin is zero and only
        // the win branch of the moment functions is needed.
        let t = (team_mu[winner] - team_mu[loser]) / c;
        let v = v_win(t);
        let w = v * (v + t);

        let mut posterior = [Vec::new(), Vec::new()];
        for side in 0..2 {
            let sign = if side == winner { 1.0 } else { -1.0 };
            for (rating, variance) in teams[side].iter().zip(&variances[side]) {
                let mu = rating.mu + sign * (variance / c) * v;
                let shrink = 1.0 - (variance / c_squared) * w;
                if shrink <= 0.0 {
                    return Err(EngineError::Numeric(format!(
                        "posterior variance collapsed (shrink factor {shrink})"
                    )));
                }
                let sigma = (variance * shrink).sqrt();
                if !mu.is_finite() || !sigma.is_finite() || sigma < SIGMA_FLOOR {
                    return Err(EngineError::Numeric(format!(
                        "degenerate posterior (mu {mu}, sigma {sigma})"
                    )));
                }
                posterior[side].push(Rating::new(mu, sigma));
            }
        }
        Ok(posterior)
    }
}

/// Mean correction of a Gaussian truncated to a win, `pdf(t) / cdf(t)`.
fn v_win(t: f64) -> f64 {
    let denom = normal_cdf(t);
    if denom < f64::MIN_POSITIVE {
        // cdf underflowed; the limit of pdf/cdf as t -> -inf is -t.
        -t
    } else {
        normal_pdf(t) / denom
    }
}

fn normal_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}
