//! Utility functions for the debate orchestrator

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique session ID
pub fn generate_session_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique channel ID
pub fn generate_channel_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate an 8 character invite code
pub fn generate_invite_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Pick one entry of a non-empty list without a dedicated RNG
pub fn pick_random<T>(items: &[T]) -> Option<&T> {
    if items.is_empty() {
        return None;
    }
    let index = (Uuid::new_v4().as_u128() % items.len() as u128) as usize;
    items.get(index)
}

/// Round a rating for display; stored ratings keep full precision
pub fn display_rating(rating: f64) -> i64 {
    rating.round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_session_id();
        let id2 = generate_session_id();
        assert_ne!(id1, id2);

        let channel1 = generate_channel_id();
        let channel2 = generate_channel_id();
        assert_ne!(channel1, channel2);
    }

    #[test]
    fn test_invite_code_shape() {
        let code = generate_invite_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(code, generate_invite_code());
    }

    #[test]
    fn test_pick_random() {
        let empty: Vec<&str> = vec![];
        assert!(pick_random(&empty).is_none());

        let topics = vec!["a", "b", "c"];
        for _ in 0..20 {
            assert!(topics.contains(pick_random(&topics).unwrap()));
        }
    }

    #[test]
    fn test_display_rating() {
        assert_eq!(display_rating(1662.31), 1662);
        assert_eq!(display_rating(1337.5), 1338);
        assert_eq!(display_rating(-0.4), 0);
    }
}
