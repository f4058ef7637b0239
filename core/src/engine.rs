use crate::{
    db::{self, Db},
    error::{EngineError, Result},
    model::SkillModel,
    player::{Gender, PlayerId},
    policy::{GenderPolicy, Participant},
    rating::Rating,
    record::{Outcome, PlayedMatch},
};
use itertools::Itertools;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Post-update view of one participant, as handed back to the caller.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PlayerUpdate {
    pub id: PlayerId,
    pub rating: Rating,
    pub score: i64,
}

impl PlayerUpdate {
    fn new(id: PlayerId, rating: Rating) -> Self {
        Self {
            id,
            rating,
            score: rating.score(),
        }
    }
}

/// The rating engine: applies match outcomes to player ratings and
/// re-derives them from history when it changes.
///
/// All mutations run inside a single store transaction, so a match record
/// and the rating writes it causes are atomic. The engine never retries;
/// a failed operation leaves the store untouched and can be retried by
/// the caller.
pub struct Engine {
    db: Db,
    model: SkillModel,
    policy: GenderPolicy,
}

impl Engine {
    pub fn new(db: Db) -> Self {
        Self::with_parameters(db, SkillModel::default(), GenderPolicy::default())
    }

    pub fn with_parameters(db: Db, model: SkillModel, policy: GenderPolicy) -> Self {
        Self { db, model, policy }
    }

    /// The global model parameters, for configuration and statistics
    /// surfaces.
    pub fn parameters(&self) -> SkillModel {
        self.model
    }

    /// Direct access to the underlying store, for the collaborators that
    /// own players and history (creation, deletion, listings).
    pub fn db(&mut self) -> &mut Db {
        &mut self.db
    }

    /// Apply a freshly played match: insert its record and update every
    /// participant's rating, atomically.
    pub async fn apply_match(&mut self, played: &PlayedMatch) -> Result<Vec<PlayerUpdate>> {
        played.validate()?;

        let participants = played.participants().collect_vec();
        let mut tx = self.db.begin().await?;

        let players = db::players_by_ids(&mut tx, &participants).await?;
        for pid in &participants {
            if !players.contains_key(pid) {
                return Err(EngineError::PlayerMissing(*pid));
            }
        }

        let id = db::insert_match(&mut tx, played).await?;

        let state: HashMap<PlayerId, (Gender, Rating)> = players
            .into_iter()
            .map(|(pid, player)| (pid, (player.gender, player.rating)))
            .collect();
        let updated = match rate_played(&self.model, &self.policy, played, &state) {
            Ok(updated) => updated,
            Err(err) => {
                tracing::warn!(
                    %err,
                    date = %played.date,
                    a_games = played.a_games,
                    b_games = played.b_games,
                    "match update refused"
                );
                return Err(err);
            }
        };

        for (pid, rating) in &updated {
            db::set_rating(&mut tx, *pid, *rating).await?;
        }
        tx.commit().await?;

        tracing::debug!(
            %id,
            date = %played.date,
            suspense = played.suspense(),
            outcome = %played.outcome(),
            "applied match"
        );
        Ok(collect_updates(&participants, &updated))
    }

    /// Re-derive ratings for `ids` from priors by replaying every match
    /// any of them took part in, ordered by `(match_date, id)` ascending.
    ///
    /// Participants outside the set contribute their stored ratings as
    /// fixed snapshots and are not written back. That bounds the work per
    /// history edit but is not a global replay; pass every player id (or
    /// use [`Engine::recalculate_all`]) when global consistency matters.
    pub async fn recalculate(&mut self, ids: &[PlayerId]) -> Result<Vec<PlayerUpdate>> {
        let ids = ids.iter().copied().unique().collect_vec();
        let set: HashSet<PlayerId> = ids.iter().copied().collect();

        let mut tx = self.db.begin().await?;

        let members = db::players_by_ids(&mut tx, &ids).await?;
        for pid in &ids {
            if !members.contains_key(pid) {
                return Err(EngineError::PlayerMissing(*pid));
            }
        }

        let history = db::matches_involving(&mut tx, &ids).await?;

        // One batched read covers the recalculation set and every
        // opponent appearing anywhere in its history.
        let involved = history
            .iter()
            .flat_map(|m| m.played.participants())
            .chain(ids.iter().copied())
            .unique()
            .collect_vec();
        let stored = db::players_by_ids(&mut tx, &involved).await?;

        let mut state: HashMap<PlayerId, (Gender, Rating)> = HashMap::new();
        for pid in &involved {
            let player = stored
                .get(pid)
                .ok_or(EngineError::PlayerMissing(*pid))?;
            let rating = if set.contains(pid) {
                self.model.prior()
            } else {
                player.rating
            };
            state.insert(*pid, (player.gender, rating));
        }

        for record in &history {
            let updated = rate_played(&self.model, &self.policy, &record.played, &state)?;
            for (pid, rating) in updated {
                if set.contains(&pid) {
                    if let Some(entry) = state.get_mut(&pid) {
                        entry.1 = rating;
                    }
                }
            }
        }

        for pid in &ids {
            if let Some((_, rating)) = state.get(pid) {
                db::set_rating(&mut tx, *pid, *rating).await?;
            }
        }
        tx.commit().await?;

        tracing::debug!(
            players = ids.len(),
            matches = history.len(),
            "recalculated ratings from history"
        );
        Ok(collect_updates(&ids, &state.iter().map(|(pid, (_, r))| (*pid, *r)).collect()))
    }

    /// Replay the whole store: [`Engine::recalculate`] over every player.
    pub async fn recalculate_all(&mut self) -> Result<Vec<PlayerUpdate>> {
        let ids = self.db.all_player_ids().await?;
        self.recalculate(&ids).await
    }

    /// Write prior ratings to every listed player.
    pub async fn reset(&mut self, ids: &[PlayerId]) -> Result<()> {
        let ids = ids.iter().copied().unique().collect_vec();
        let mut tx = self.db.begin().await?;

        let players = db::players_by_ids(&mut tx, &ids).await?;
        for pid in &ids {
            if !players.contains_key(pid) {
                return Err(EngineError::PlayerMissing(*pid));
            }
            db::set_rating(&mut tx, *pid, self.model.prior()).await?;
        }
        tx.commit().await?;

        tracing::debug!(players = ids.len(), "reset ratings to priors");
        Ok(())
    }
}

/// The per-match rating step: suspense-scaled skill width, the Bayesian
/// team update, then the gender adjustment on the resulting mu deltas.
///
/// Pure with respect to the store; both the incremental path and the
/// replay loop go through here, which is what makes a replay reproduce
/// incremental results exactly.
fn rate_played(
    model: &SkillModel,
    policy: &GenderPolicy,
    played: &PlayedMatch,
    state: &HashMap<PlayerId, (Gender, Rating)>,
) -> Result<HashMap<PlayerId, Rating>> {
    let lookup = |pid: &PlayerId| {
        state
            .get(pid)
            .copied()
            .ok_or(EngineError::PlayerMissing(*pid))
    };

    // Blowouts are played under a narrower skill width: the same outcome
    // carries more information when the score was one-sided.
    let suspense = played.suspense();
    let per_match = model.with_beta(model.beta * (1.0 - 0.5 * suspense));

    let team_a = played
        .side_a
        .iter()
        .map(|pid| lookup(pid).map(|(_, r)| r))
        .collect::<Result<Vec<_>>>()?;
    let team_b = played
        .side_b
        .iter()
        .map(|pid| lookup(pid).map(|(_, r)| r))
        .collect::<Result<Vec<_>>>()?;

    let ranks = match played.outcome() {
        Outcome::Win => [0, 1],
        Outcome::Loss => [1, 0],
    };
    let [new_a, new_b] = per_match.rate([&team_a, &team_b], ranks)?;

    let mut updated: HashMap<PlayerId, Rating> = played
        .side_a
        .iter()
        .copied()
        .zip(new_a)
        .chain(played.side_b.iter().copied().zip(new_b))
        .collect();

    // Gender adjustment, driven by the probabilistic deltas.
    let participant = |pid: &PlayerId| -> Result<Participant> {
        let (gender, base) = lookup(pid)?;
        let delta = updated
            .get(pid)
            .map(|r| r.mu - base.mu)
            .unwrap_or_default();
        Ok(Participant {
            id: *pid,
            gender,
            delta,
        })
    };
    let (winning_side, losing_side) = match played.outcome() {
        Outcome::Win => (&played.side_a, &played.side_b),
        Outcome::Loss => (&played.side_b, &played.side_a),
    };
    let winners = winning_side.iter().map(participant).collect::<Result<Vec<_>>>()?;
    let losers = losing_side.iter().map(participant).collect::<Result<Vec<_>>>()?;

    for (pid, amount) in policy.adjustments(&winners, &losers) {
        if let Some(rating) = updated.get_mut(&pid) {
            rating.mu += amount;
        }
    }
    Ok(updated)
}

fn collect_updates(
    order: &[PlayerId],
    ratings: &HashMap<PlayerId, Rating>,
) -> Vec<PlayerUpdate> {
    order
        .iter()
        .filter_map(|pid| ratings.get(pid).map(|r| PlayerUpdate::new(*pid, *r)))
        .collect()
}
