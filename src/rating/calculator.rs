//! Rating calculator trait
//!
//! Two-player, single-game rating periods. Implementations are pure: they
//! never touch storage, so the caller can recompute freely from a fresh
//! snapshot when a versioned commit loses.

use crate::error::Result;
use crate::types::PlayerRating;
use serde::{Deserialize, Serialize};

/// New ratings of both sides after one game
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingUpdate {
    pub a: PlayerRating,
    pub b: PlayerRating,
}

/// Trait for calculating rating changes after a debate
pub trait RatingCalculator: Send + Sync {
    /// Rate a single game between `a` and `b`
    ///
    /// `score_for_a` must be 1.0 (A won), 0.5 (draw) or 0.0 (B won).
    fn apply_result(
        &self,
        a: &PlayerRating,
        b: &PlayerRating,
        score_for_a: f64,
    ) -> Result<RatingUpdate>;

    /// Rating assigned to participants on first sight
    fn initial_rating(&self) -> PlayerRating;
}
