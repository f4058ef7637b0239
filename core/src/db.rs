use crate::{
    player::{Gender, Player, PlayerId, PlayerStats},
    rating::Rating,
    record::{MatchId, MatchRecord, PlayedMatch},
};
use anyhow::Context;
use chrono::NaiveDate;
use futures::stream::{Stream, StreamExt};
use itertools::Itertools;
use sqlx::{
    migrate, query, query_as,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Connection, Transaction,
};
use std::{collections::HashMap, path::Path};

/// The player store and match store, backed by a single SQLite file.
///
/// The engine performs all rating mutations through a [`Transaction`]
/// obtained from [`Db::begin`], so a match record and the rating writes it
/// causes commit or roll back together.
#[derive(Debug)]
pub struct Db {
    conn: SqliteConnection,
}

impl Db {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        Self::new(
            SqliteConnectOptions::default()
                .filename(path)
                .create_if_missing(true),
        )
        .await
    }

    pub async fn memory() -> anyhow::Result<Self> {
        Self::new(Default::default()).await
    }

    async fn new(opt: SqliteConnectOptions) -> anyhow::Result<Self> {
        let mut conn = opt.foreign_keys(true).connect().await?;
        migrate!("db/migrations").run(&mut conn).await?;
        Ok(Self { conn })
    }

    pub async fn begin(&mut self) -> sqlx::Result<Transaction<'_, Sqlite>> {
        self.conn.begin().await
    }

    /// Create a player with prior ratings. Players are created by the
    /// surrounding application; the engine itself only ever updates the
    /// rating columns.
    pub async fn create_player(&mut self, name: &str, gender: Gender) -> anyhow::Result<Player> {
        let (id,): (i64,) = query_as("INSERT INTO player (name, gender) VALUES ($1, $2) RETURNING id")
            .bind(name)
            .bind(gender)
            .fetch_one(&mut self.conn)
            .await?;

        tracing::debug!(id, name, "created player");
        Ok(Player {
            id: id.into(),
            name: name.to_owned(),
            gender,
            rating: Rating::default(),
        })
    }

    pub async fn player(&mut self, id: PlayerId) -> anyhow::Result<Player> {
        let (name, gender, mu, sigma): (String, Gender, f64, f64) =
            query_as("SELECT name, gender, mu, sigma FROM player WHERE id = $1 LIMIT 1")
                .bind(i64::from(id))
                .fetch_optional(&mut self.conn)
                .await?
                .context(format!("player {id} not found"))?;
        Ok(Player {
            id,
            name,
            gender,
            rating: Rating::new(mu, sigma),
        })
    }

    /// Every player, in id order.
    pub fn players(&mut self) -> impl '_ + Stream<Item = anyhow::Result<Player>> {
        query_as::<_, (i64, String, Gender, f64, f64)>(
            "SELECT id, name, gender, mu, sigma FROM player ORDER BY id",
        )
        .fetch(&mut self.conn)
        .map(|res| {
            let (id, name, gender, mu, sigma) = res?;
            Ok(Player {
                id: id.into(),
                name,
                gender,
                rating: Rating::new(mu, sigma),
            })
        })
    }

    pub async fn all_player_ids(&mut self) -> sqlx::Result<Vec<PlayerId>> {
        let rows: Vec<(i64,)> = query_as("SELECT id FROM player ORDER BY id")
            .fetch_all(&mut self.conn)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id.into()).collect())
    }

    /// Win/loss aggregate for one player, computed from the match store.
    pub async fn player_stats(&mut self, id: PlayerId) -> anyhow::Result<PlayerStats> {
        let (wins, losses, last_match): (i64, i64, Option<NaiveDate>) = query_as(
            "SELECT
                COALESCE(SUM(CASE WHEN ($1 IN (a1, a2) AND a_games > b_games)
                               OR ($1 IN (b1, b2) AND b_games > a_games) THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN ($1 IN (a1, a2) AND a_games < b_games)
                               OR ($1 IN (b1, b2) AND b_games < a_games) THEN 1 ELSE 0 END), 0),
                MAX(match_date)
             FROM match_record
             WHERE $1 IN (a1, a2, b1, b2)",
        )
        .bind(i64::from(id))
        .fetch_one(&mut self.conn)
        .await?;

        Ok(PlayerStats {
            wins: wins as u32,
            losses: losses as u32,
            last_match,
        })
    }

    /// Every match record, ordered by `(match_date, id)` ascending.
    pub async fn matches(&mut self) -> sqlx::Result<Vec<MatchRecord>> {
        let rows: Vec<MatchRow> = query_as(
            "SELECT id, match_date, a1, a2, b1, b2, a_games, b_games
             FROM match_record
             ORDER BY match_date ASC, id ASC",
        )
        .fetch_all(&mut self.conn)
        .await?;
        Ok(rows.into_iter().map(record_from_row).collect())
    }

    /// Remove a match record. History edits are the application's call;
    /// the engine's half of the contract is a subsequent recalculation.
    pub async fn delete_match(&mut self, id: MatchId) -> sqlx::Result<()> {
        query("DELETE FROM match_record WHERE id = $1")
            .bind(i64::from(id))
            .execute(&mut self.conn)
            .await?;
        tracing::debug!(%id, "deleted match record");
        Ok(())
    }
}

/// Batched read of players by id. Ids absent from the store are simply
/// absent from the result; the caller decides whether that is an error.
pub(crate) async fn players_by_ids<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    ids: &[PlayerId],
) -> sqlx::Result<HashMap<PlayerId, Player>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = (1..=ids.len()).map(|i| format!("${i}")).join(", ");
    let sql =
        format!("SELECT id, name, gender, mu, sigma FROM player WHERE id IN ({placeholders})");

    let mut q = query_as::<_, (i64, String, Gender, f64, f64)>(&sql);
    for id in ids {
        q = q.bind(i64::from(*id));
    }
    let rows = q.fetch_all(tx.as_mut()).await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, gender, mu, sigma)| {
            (
                PlayerId::from(id),
                Player {
                    id: id.into(),
                    name,
                    gender,
                    rating: Rating::new(mu, sigma),
                },
            )
        })
        .collect())
}

pub(crate) async fn set_rating<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    id: PlayerId,
    rating: Rating,
) -> sqlx::Result<()> {
    query("UPDATE player SET mu = $1, sigma = $2 WHERE id = $3")
        .bind(rating.mu)
        .bind(rating.sigma)
        .bind(i64::from(id))
        .execute(tx.as_mut())
        .await?;
    Ok(())
}

pub(crate) async fn insert_match<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    played: &PlayedMatch,
) -> sqlx::Result<MatchId> {
    let (id,): (i64,) = query_as(
        "INSERT INTO match_record (match_date, a1, a2, b1, b2, a_games, b_games)
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
    )
    .bind(played.date)
    .bind(i64::from(played.side_a[0]))
    .bind(played.side_a.get(1).map(|p| i64::from(*p)))
    .bind(i64::from(played.side_b[0]))
    .bind(played.side_b.get(1).map(|p| i64::from(*p)))
    .bind(played.a_games)
    .bind(played.b_games)
    .fetch_one(tx.as_mut())
    .await?;
    Ok(id.into())
}

/// Every match involving any of `ids`, ordered by `(match_date, id)`
/// ascending. The id is the sole tie-break on equal dates, which is what
/// keeps a full replay deterministic.
pub(crate) async fn matches_involving<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    ids: &[PlayerId],
) -> sqlx::Result<Vec<MatchRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=ids.len()).map(|i| format!("${i}")).join(", ");
    let sql = format!(
        "SELECT id, match_date, a1, a2, b1, b2, a_games, b_games
         FROM match_record
         WHERE a1 IN ({placeholders}) OR a2 IN ({placeholders})
            OR b1 IN ({placeholders}) OR b2 IN ({placeholders})
         ORDER BY match_date ASC, id ASC"
    );

    let mut q = query_as::<_, MatchRow>(&sql);
    for id in ids {
        q = q.bind(i64::from(*id));
    }
    let rows = q.fetch_all(tx.as_mut()).await?;
    Ok(rows.into_iter().map(record_from_row).collect())
}

type MatchRow = (i64, NaiveDate, i64, Option<i64>, i64, Option<i64>, u32, u32);

fn record_from_row((id, date, a1, a2, b1, b2, a_games, b_games): MatchRow) -> MatchRecord {
    let mut side_a = vec![PlayerId::from(a1)];
    side_a.extend(a2.map(PlayerId::from));
    let mut side_b = vec![PlayerId::from(b1)];
    side_b.extend(b2.map(PlayerId::from));
    MatchRecord {
        id: id.into(),
        played: PlayedMatch {
            date,
            side_a,
            side_b,
            a_games,
            b_games,
        },
    }
}
