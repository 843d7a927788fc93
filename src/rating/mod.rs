//! Rating system integration using the Glicko-2 algorithm
//!
//! This module provides rating calculations and participant rating records,
//! on top of the skillratings crate.

pub mod calculator;
pub mod glicko2;
pub mod storage;

// Re-export commonly used types
pub use calculator::{RatingCalculator, RatingUpdate};
pub use glicko2::Glicko2RatingCalculator;
pub use storage::{ParticipantCommit, ParticipantProfile, ParticipantRecord, ParticipantStore};
