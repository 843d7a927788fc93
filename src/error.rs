//! Error types for the debate orchestrator
//!
//! The core command surface returns the typed [`DebateError`] so callers can
//! tell retriable failures apart from terminal ones. Service bootstrap and
//! configuration loading use `anyhow` instead.

use crate::types::{SessionId, SessionState};

/// Result type alias for the core command surface
pub type Result<T> = std::result::Result<T, DebateError>;

/// Errors surfaced by the session orchestrator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DebateError {
    /// The session's current state does not permit the requested move
    #[error("Invalid transition for session {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
    },

    /// The caller is not a participant of the session
    #[error("User {user_id} is not a participant of session {session_id}")]
    NotParticipant {
        session_id: SessionId,
        user_id: String,
    },

    /// A compare-and-swap lost against a concurrent writer
    #[error("Concurrent update lost on session {session_id} (expected state {expected})")]
    RaceLost {
        session_id: SessionId,
        expected: SessionState,
    },

    /// The Judge oracle errored or timed out
    #[error("Judge oracle failure: {reason}")]
    OracleFailure { reason: String },

    /// A transactional write failed; the request may be resubmitted
    #[error("Storage failure: {message}")]
    StorageFailure { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },

    #[error("Invite not found: {code}")]
    InviteNotFound { code: String },

    #[error("Participant not found: {user_id}")]
    ParticipantNotFound { user_id: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl DebateError {
    /// Whether the caller may resubmit the same request unchanged
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DebateError::StorageFailure { .. } | DebateError::RaceLost { .. }
        )
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        DebateError::StorageFailure {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let id = uuid::Uuid::new_v4();
        assert!(DebateError::StorageFailure {
            message: "disk".to_string()
        }
        .is_retriable());
        assert!(DebateError::RaceLost {
            session_id: id,
            expected: SessionState::Waiting
        }
        .is_retriable());
        assert!(!DebateError::NotParticipant {
            session_id: id,
            user_id: "u".to_string()
        }
        .is_retriable());
        assert!(!DebateError::InvalidTransition {
            session_id: id,
            from: SessionState::Completed,
            to: SessionState::Voting
        }
        .is_retriable());
    }

    #[test]
    fn test_error_messages() {
        let id = uuid::Uuid::new_v4();
        let err = DebateError::InvalidTransition {
            session_id: id,
            from: SessionState::Waiting,
            to: SessionState::Voting,
        };
        assert!(err.to_string().contains("waiting -> voting"));
    }
}
