use crate::player::{Gender, PlayerId};

/// One participant of a decided match as seen by the adjustment policy:
/// who they are and the mu movement the probabilistic step gave them.
#[derive(Clone, Copy, Debug)]
pub struct Participant {
    pub id: PlayerId,
    pub gender: Gender,
    pub delta: f64,
}

/// Post-processing of the probabilistic mu deltas based on the gender
/// composition of the two sides. Sigma is never touched.
///
/// The constants are hand-tuned to smooth the volatility of mixed-gender
/// matches and are carried as plain fields so deployments can tune them
/// without a rebuild. All rules are additive; in a mixed match a single
/// player can be hit by more than one. A player with `Gender::Unknown`
/// neither triggers nor receives any rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenderPolicy {
    /// Flat mu bonus for each female winner when the losing side fields a
    /// male player.
    pub female_win_bonus: f64,

    /// Fraction of a male winner's positive delta removed when the beaten
    /// side fields a female player and no male.
    pub male_win_damp: f64,

    /// Flat mu penalty for each male loser when the winning side fields a
    /// female player.
    pub male_loss_penalty: f64,

    /// Fraction of a female loser's negative delta restored when the
    /// winning side fields a male player.
    pub female_loss_relief: f64,

    /// Fraction of a male loser's negative delta restored when his own
    /// side also fields a female player.
    pub mixed_loss_relief: f64,
}

impl Default for GenderPolicy {
    fn default() -> Self {
        Self {
            female_win_bonus: 0.6,
            male_win_damp: 0.3,
            male_loss_penalty: 0.4,
            female_loss_relief: 0.5,
            mixed_loss_relief: 0.3,
        }
    }
}

impl GenderPolicy {
    /// Compute the additive mu corrections for a decided match.
    ///
    /// `winners` and `losers` carry the per-player probabilistic deltas;
    /// the returned pairs are corrections to add on top of the updated
    /// mu, at most one entry per player. A match with no female player on
    /// either side yields no corrections.
    pub fn adjustments(
        &self,
        winners: &[Participant],
        losers: &[Participant],
    ) -> Vec<(PlayerId, f64)> {
        let winner_has_female = winners.iter().any(|p| p.gender.is_female());
        let winner_has_male = winners.iter().any(|p| p.gender.is_male());
        let loser_has_female = losers.iter().any(|p| p.gender.is_female());
        let loser_has_male = losers.iter().any(|p| p.gender.is_male());

        let mut corrections: Vec<(PlayerId, f64)> = Vec::new();
        let mut push = |id: PlayerId, amount: f64| {
            if let Some(entry) = corrections.iter_mut().find(|(pid, _)| *pid == id) {
                entry.1 += amount;
            } else {
                corrections.push((id, amount));
            }
        };

        // Female winners over a male opponent get a flat bonus.
        if winner_has_female && loser_has_male {
            for p in winners.iter().filter(|p| p.gender.is_female()) {
                push(p.id, self.female_win_bonus);
            }
        }

        // Male winners over a side with a female and no male get their
        // gains damped; beating a mixed side is unadjusted.
        if winner_has_male && loser_has_female && !loser_has_male {
            for p in winners.iter().filter(|p| p.gender.is_male() && p.delta > 0.0) {
                push(p.id, -self.male_win_damp * p.delta);
            }
        }

        // Male losers to a side with a female pay a flat penalty.
        if loser_has_male && winner_has_female {
            for p in losers.iter().filter(|p| p.gender.is_male()) {
                push(p.id, -self.male_loss_penalty);
            }
        }

        // Female losers to a male opponent get part of the loss back.
        if loser_has_female && winner_has_male {
            for p in losers.iter().filter(|p| p.gender.is_female() && p.delta < 0.0) {
                push(p.id, self.female_loss_relief * p.delta.abs());
            }
        }

        // A male losing alongside a female teammate gets part back too.
        if loser_has_female && loser_has_male {
            for p in losers.iter().filter(|p| p.gender.is_male() && p.delta < 0.0) {
                push(p.id, self.mixed_loss_relief * p.delta.abs());
            }
        }

        corrections
    }
}
