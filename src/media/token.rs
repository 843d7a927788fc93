//! Short-lived media room credentials
//!
//! Tokens are HS256 JWTs signed with the media API secret. Each one admits a
//! single identity to the room of one debate session.

use crate::config::MediaSettings;
use crate::error::{DebateError, Result};
use crate::types::SessionId;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Room grant carried in the `video` claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomGrant {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaClaims {
    /// API key
    pub iss: String,
    /// Participant identity
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: RoomGrant,
}

/// Credential handed to a participant of a video session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaCredential {
    pub token: String,
    pub room: String,
    pub identity: String,
    pub server_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Room name for a session
pub fn room_name(session_id: SessionId) -> String {
    format!("debate-{}", session_id)
}

#[derive(Clone)]
pub struct MediaTokenIssuer {
    api_key: String,
    encoding_key: EncodingKey,
    ttl: Duration,
    server_url: String,
}

impl MediaTokenIssuer {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: &str,
        ttl: Duration,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            encoding_key: EncodingKey::from_secret(api_secret.as_bytes()),
            ttl,
            server_url: server_url.into(),
        }
    }

    pub fn from_settings(settings: &MediaSettings) -> Self {
        Self::new(
            settings.api_key.clone(),
            &settings.api_secret,
            Duration::from_secs(settings.token_ttl_seconds),
            settings.server_url.clone(),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a credential for `identity` in the room of `session_id`
    ///
    /// Callers check that the session is a video session and that the
    /// identity participates in it.
    pub fn issue(
        &self,
        session_id: SessionId,
        identity: &str,
        display_name: &str,
    ) -> Result<MediaCredential> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|e| {
            DebateError::ConfigurationError {
                message: format!("Media token TTL out of range: {}", e),
            }
        })?;
        let expires_at = now + ttl;
        let room = room_name(session_id);

        let claims = MediaClaims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            name: display_name.to_string(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            video: RoomGrant {
                room: room.clone(),
                room_join: true,
                can_publish: true,
                can_subscribe: true,
            },
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| DebateError::InternalError {
                message: format!("Failed to sign media token: {}", e),
            })?;

        debug!(
            "Issued media token for '{}' in room {} (expires {})",
            identity, room, expires_at
        );

        Ok(MediaCredential {
            token,
            room,
            identity: identity.to_string(),
            server_url: self.server_url.clone(),
            expires_at,
        })
    }
}
