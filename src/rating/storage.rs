//! Participant rating records
//!
//! Records are only ever replaced through a versioned commit, so two
//! completions racing on the same participant cannot both apply.

use crate::error::Result;
use crate::types::{PlayerRating, RatingChange, UserId};
use crate::utils::display_rating;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deviation above which a rating is shown as provisional
pub const PROVISIONAL_DEVIATION: f64 = 200.0;

/// Stored rating record of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub user_id: UserId,
    pub rating: PlayerRating,
    pub total_debates: u64,
    pub wins: u64,
    pub losses: u64,
    /// Bumped on every committed change; 0 means never stored
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParticipantRecord {
    /// Create a record for a participant seen for the first time
    pub fn new(user_id: UserId, initial_rating: PlayerRating) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            rating: initial_rating,
            total_debates: 0,
            wins: 0,
            losses: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.rating.deviation > PROVISIONAL_DEVIATION
    }

    /// Successor record after one rated debate with the given score
    pub fn after_debate(&self, new_rating: PlayerRating, score: f64) -> Self {
        let mut next = self.clone();
        next.rating = new_rating;
        next.total_debates += 1;
        if score == 1.0 {
            next.wins += 1;
        } else if score == 0.0 {
            next.losses += 1;
        }
        next.version = self.version + 1;
        next.updated_at = Utc::now();
        next
    }

    /// Rounded view of the change from `self` to `next`
    pub fn change_to(&self, next: &ParticipantRecord) -> RatingChange {
        RatingChange {
            user_id: self.user_id.clone(),
            old_rating: display_rating(self.rating.rating),
            new_rating: display_rating(next.rating.rating),
            // Rounded from the exact difference, not from the rounded ends
            change: display_rating(next.rating.rating - self.rating.rating),
        }
    }
}

/// Versioned replacement of a participant record
#[derive(Debug, Clone)]
pub struct ParticipantCommit {
    /// Version the replacement was computed from
    pub expected_version: u64,
    pub record: ParticipantRecord,
}

/// Public profile of a participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub user_id: UserId,
    pub rating: i64,
    pub rating_deviation: f64,
    pub volatility: f64,
    pub provisional: bool,
    pub total_debates: u64,
    pub wins: u64,
    pub losses: u64,
}

impl From<&ParticipantRecord> for ParticipantProfile {
    fn from(record: &ParticipantRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            rating: display_rating(record.rating.rating),
            rating_deviation: record.rating.deviation,
            volatility: record.rating.volatility,
            provisional: record.is_provisional(),
            total_debates: record.total_debates,
            wins: record.wins,
            losses: record.losses,
        }
    }
}

/// Read access to participant rating records
///
/// Writes go through the session store's completion commit.
pub trait ParticipantStore: Send + Sync {
    /// Get a participant's record if one was ever committed
    fn get_participant(&self, user_id: &str) -> Result<Option<ParticipantRecord>>;

    /// Get a participant's record, or a fresh unversioned one
    fn participant_or_initial(
        &self,
        user_id: &str,
        initial_rating: PlayerRating,
    ) -> Result<ParticipantRecord> {
        Ok(self
            .get_participant(user_id)?
            .unwrap_or_else(|| ParticipantRecord::new(user_id.to_string(), initial_rating)))
    }

    /// Number of participants with a committed record
    fn participant_count(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_provisional() {
        let record = ParticipantRecord::new("alice".to_string(), PlayerRating::default());
        assert!(record.is_provisional());
        assert_eq!(record.version, 0);
        assert_eq!(record.total_debates, 0);
    }

    #[test]
    fn test_after_debate_counts() {
        let record = ParticipantRecord::new("alice".to_string(), PlayerRating::default());
        let rating = PlayerRating {
            rating: 1662.3,
            deviation: 290.3,
            volatility: 0.06,
        };

        let won = record.after_debate(rating, 1.0);
        assert_eq!((won.wins, won.losses, won.total_debates), (1, 0, 1));
        assert_eq!(won.version, 1);

        let drew = won.after_debate(rating, 0.5);
        assert_eq!((drew.wins, drew.losses, drew.total_debates), (1, 0, 2));

        let lost = drew.after_debate(rating, 0.0);
        assert_eq!((lost.wins, lost.losses, lost.total_debates), (1, 1, 3));
        assert_eq!(lost.version, 3);
    }

    #[test]
    fn test_rating_change_view_is_rounded() {
        let before = ParticipantRecord::new("bob".to_string(), PlayerRating::default());
        let after = before.after_debate(
            PlayerRating {
                rating: 1337.6,
                deviation: 290.0,
                volatility: 0.06,
            },
            0.0,
        );
        let change = before.change_to(&after);
        assert_eq!(change.old_rating, 1500);
        assert_eq!(change.new_rating, 1338);
        assert_eq!(change.change, -162);
    }

    #[test]
    fn test_rating_change_rounds_the_exact_delta() {
        let mut before = ParticipantRecord::new("bob".to_string(), PlayerRating::default());
        before.rating.rating = 1500.4;
        let after = before.after_debate(
            PlayerRating {
                rating: 1510.6,
                deviation: 290.0,
                volatility: 0.06,
            },
            1.0,
        );
        let change = before.change_to(&after);
        assert_eq!(change.old_rating, 1500);
        assert_eq!(change.new_rating, 1511);
        assert_eq!(change.change, 10);
    }

    #[test]
    fn test_profile_flags_provisional() {
        let mut record = ParticipantRecord::new("carol".to_string(), PlayerRating::default());
        assert!(ParticipantProfile::from(&record).provisional);
        record.rating.deviation = 150.0;
        assert!(!ParticipantProfile::from(&record).provisional);
    }
}
