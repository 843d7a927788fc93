//! Glicko-2 rating system implementation
//!
//! This module provides the concrete rating calculator on top of the
//! Glicko-2 implementation in the skillratings crate, with a configurable
//! floor on rating deviation.

use crate::config::RatingConfig;
use crate::error::{DebateError, Result};
use crate::rating::calculator::{RatingCalculator, RatingUpdate};
use crate::types::PlayerRating;
use skillratings::glicko2::{glicko2, Glicko2Config, Glicko2Rating};
use skillratings::Outcomes;
use tracing::debug;

impl From<PlayerRating> for Glicko2Rating {
    fn from(rating: PlayerRating) -> Self {
        Glicko2Rating {
            rating: rating.rating,
            deviation: rating.deviation,
            volatility: rating.volatility,
        }
    }
}

impl From<Glicko2Rating> for PlayerRating {
    fn from(rating: Glicko2Rating) -> Self {
        PlayerRating {
            rating: rating.rating,
            deviation: rating.deviation,
            volatility: rating.volatility,
        }
    }
}

/// Map a score for A onto the skillratings outcome from A's perspective
fn outcome_for_score(score_for_a: f64) -> Result<Outcomes> {
    if score_for_a == 1.0 {
        Ok(Outcomes::WIN)
    } else if score_for_a == 0.5 {
        Ok(Outcomes::DRAW)
    } else if score_for_a == 0.0 {
        Ok(Outcomes::LOSS)
    } else {
        Err(DebateError::InvalidRequest {
            reason: format!("Score must be 1, 0.5 or 0, got {}", score_for_a),
        })
    }
}

/// Glicko-2 rating calculator
#[derive(Debug, Clone)]
pub struct Glicko2RatingCalculator {
    glicko2_config: Glicko2Config,
    initial: PlayerRating,
    deviation_floor: f64,
}

impl Glicko2RatingCalculator {
    /// Create a new calculator from validated rating settings
    pub fn new(config: &RatingConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| DebateError::ConfigurationError {
                message: e.to_string(),
            })?;

        let mut glicko2_config = Glicko2Config::new();
        glicko2_config.tau = config.tau;

        Ok(Self {
            glicko2_config,
            initial: PlayerRating {
                rating: config.initial_rating,
                deviation: config.initial_deviation,
                volatility: config.initial_volatility,
            },
            deviation_floor: config.deviation_floor,
        })
    }

    fn floored(&self, rating: Glicko2Rating) -> PlayerRating {
        let mut rating: PlayerRating = rating.into();
        if rating.deviation < self.deviation_floor {
            rating.deviation = self.deviation_floor;
        }
        rating
    }
}

impl Default for Glicko2RatingCalculator {
    fn default() -> Self {
        let config = RatingConfig::default();
        let mut glicko2_config = Glicko2Config::new();
        glicko2_config.tau = config.tau;
        Self {
            glicko2_config,
            initial: PlayerRating::default(),
            deviation_floor: config.deviation_floor,
        }
    }
}

impl RatingCalculator for Glicko2RatingCalculator {
    fn apply_result(
        &self,
        a: &PlayerRating,
        b: &PlayerRating,
        score_for_a: f64,
    ) -> Result<RatingUpdate> {
        let outcome = outcome_for_score(score_for_a)?;

        let (new_a, new_b) = glicko2(
            &Glicko2Rating::from(*a),
            &Glicko2Rating::from(*b),
            &outcome,
            &self.glicko2_config,
        );

        let update = RatingUpdate {
            a: self.floored(new_a),
            b: self.floored(new_b),
        };

        debug!(
            "Glicko-2 update (score {}): A {:.1}±{:.1} -> {:.1}±{:.1}, B {:.1}±{:.1} -> {:.1}±{:.1}",
            score_for_a,
            a.rating,
            a.deviation,
            update.a.rating,
            update.a.deviation,
            b.rating,
            b.deviation,
            update.b.rating,
            update.b.deviation
        );

        Ok(update)
    }

    fn initial_rating(&self) -> PlayerRating {
        self.initial
    }
}
