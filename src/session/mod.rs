//! Debate sessions: records, storage, change feed and the orchestrator
//!
//! This module owns the session lifecycle. Every state change goes through a
//! conditional write on the session's current state.

pub mod feed;
pub mod manager;
pub mod record;
pub mod store;

// Re-export commonly used types
pub use feed::{ChangeFeed, SessionSubscription, DEFAULT_FEED_CAPACITY};
pub use manager::{
    EndOutcome, ManagerSettings, ManagerStats, SessionManager, SessionResolution, VoteOutcome,
};
pub use record::{Session, SessionKind};
pub use store::{InMemorySessionStore, SessionMutation, SessionStore};
