//! Pairing participants into debate sessions

pub mod coordinator;

pub use coordinator::{MatchAttempt, MatchResult, MatchmakingCoordinator, DEFAULT_TOPIC};
