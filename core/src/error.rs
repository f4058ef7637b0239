use crate::player::PlayerId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures surfaced by the rating engine.
///
/// Every variant refuses the whole operation: the engine never persists a
/// partial update, so a caller that sees an error can assume the store is
/// unchanged (a [`EngineError::Store`] raised at commit time rolls the
/// transaction back).
#[derive(Debug, Error)]
pub enum EngineError {
    /// A referenced player id does not resolve to a stored player.
    #[error("player {0} does not exist")]
    PlayerMissing(PlayerId),

    /// The match record is malformed (side shapes, duplicate players, draw).
    #[error("invalid match: {0}")]
    InvalidMatch(String),

    /// The probabilistic step produced a degenerate rating.
    #[error("rating update refused: {0}")]
    Numeric(String),

    /// The underlying store failed; the transaction has been rolled back.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}
