//! Rating system configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Glicko-2 parameters and commit policy for the rating engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub initial_rating: f64,
    pub initial_deviation: f64,
    pub initial_volatility: f64,
    /// System constant constraining volatility change
    pub tau: f64,
    /// Lower bound applied to deviation after every update
    pub deviation_floor: f64,
    /// Versioned commit attempts before giving up with a storage failure
    pub max_commit_attempts: u32,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            initial_rating: 1500.0,
            initial_deviation: 350.0,
            initial_volatility: 0.06,
            tau: 0.5,
            deviation_floor: 30.0,
            max_commit_attempts: 3,
        }
    }
}

impl RatingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_deviation <= 0.0 || self.initial_volatility <= 0.0 {
            return Err(anyhow!("Initial deviation and volatility must be positive"));
        }
        if self.tau <= 0.0 {
            return Err(anyhow!("Tau must be positive"));
        }
        if self.deviation_floor <= 0.0 || self.deviation_floor > self.initial_deviation {
            return Err(anyhow!(
                "Deviation floor must be in (0, {}]",
                self.initial_deviation
            ));
        }
        if self.max_commit_attempts == 0 {
            return Err(anyhow!("Max commit attempts must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RatingConfig::default();
        assert_eq!(config.initial_rating, 1500.0);
        assert_eq!(config.initial_deviation, 350.0);
        assert_eq!(config.initial_volatility, 0.06);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_floor_above_initial_rejected() {
        let config = RatingConfig {
            deviation_floor: 400.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
