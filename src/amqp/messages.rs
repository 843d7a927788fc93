//! AMQP message envelope for session events

use crate::error::{DebateError, Result};
use crate::types::SessionEvent;
use serde_json;

/// Default topic exchange for session events
pub const SESSION_EVENTS_EXCHANGE: &str = "debate.sessions";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DebateError::InternalError {
            message: format!("Failed to serialize message: {}", e),
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| DebateError::InvalidRequest {
            reason: format!("Failed to deserialize message: {}", e),
        })
    }
}

impl MessageEnvelope<SessionEvent> {
    /// Wrap a session event, routed by its kind
    ///
    /// The correlation id is derived from the session, kind and timestamp so
    /// a retried publish of the same event deduplicates.
    pub fn for_session_event(event: SessionEvent) -> Self {
        let routing_key = event.kind.routing_key().to_string();
        let correlation_id = format!(
            "{}:{}:{}",
            event.session_id,
            routing_key,
            event.timestamp.timestamp_nanos_opt().unwrap_or_default()
        );
        Self {
            correlation_id,
            timestamp: event.timestamp,
            routing_key,
            payload: event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Outcome, SessionEventKind, SessionState};

    fn completed_event() -> SessionEvent {
        SessionEvent {
            session_id: uuid::Uuid::new_v4(),
            state: SessionState::Completed,
            participant_a_id: "alice".to_string(),
            participant_b_id: Some("bob".to_string()),
            kind: SessionEventKind::Completed {
                outcome: Outcome::BWins,
                winner_id: Some("bob".to_string()),
            },
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_session_event_envelope() {
        let event = completed_event();
        let session_id = event.session_id;
        let envelope = MessageEnvelope::for_session_event(event.clone());

        assert_eq!(envelope.routing_key, "session.completed");
        assert!(envelope.correlation_id.starts_with(&session_id.to_string()));
        assert_eq!(
            envelope.correlation_id,
            MessageEnvelope::for_session_event(event).correlation_id
        );
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = MessageEnvelope::for_session_event(completed_event());
        let bytes = envelope.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["payload"]["kind"], "completed");
        assert_eq!(json["payload"]["outcome"], "B_wins");
        assert_eq!(json["payload"]["state"], "completed");

        let decoded = MessageEnvelope::<SessionEvent>::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.payload.kind, envelope.payload.kind);
    }

    #[test]
    fn test_garbage_rejected() {
        let result = MessageEnvelope::<SessionEvent>::from_bytes(b"not json");
        assert!(matches!(result, Err(DebateError::InvalidRequest { .. })));
    }
}
