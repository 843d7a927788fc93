//! Debate Arena - session orchestrator for one-on-one debates
//!
//! This crate pairs participants into debate sessions, runs each session
//! through voting or AI arbitration, and keeps Glicko-2 ratings for every
//! participant. Session events go to an in-process change feed and,
//! optionally, an AMQP exchange.

pub mod amqp;
pub mod config;
pub mod error;
pub mod fallback;
pub mod matchmaking;
pub mod media;
pub mod metrics;
pub mod rating;
pub mod resolution;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{DebateError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use matchmaking::{MatchResult, MatchmakingCoordinator};
pub use session::{
    ChangeFeed, EndOutcome, InMemorySessionStore, Session, SessionManager, SessionResolution,
    SessionStore, VoteOutcome,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
