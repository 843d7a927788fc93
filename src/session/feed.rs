//! In-process change feed
//!
//! Every session event goes onto one broadcast channel. Subscribers filter
//! by session id; a subscriber that falls behind loses the oldest events and
//! can re-read the session to catch up.

use crate::amqp::publisher::EventPublisher;
use crate::error::Result;
use crate::types::{SessionEvent, SessionId};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of buffered events per subscriber
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Broadcast feed of session events
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<SessionEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of one session
    pub fn subscribe_session(&self, session_id: SessionId) -> SessionSubscription {
        SessionSubscription {
            session_id,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for ChangeFeed {
    async fn publish_session_event(&self, event: SessionEvent) -> Result<()> {
        // No subscribers is not an error
        match self.sender.send(event) {
            Ok(receivers) => debug!("Session event delivered to {} subscribers", receivers),
            Err(broadcast::error::SendError(event)) => debug!(
                "No subscribers for {} on session {}",
                event.kind.routing_key(),
                event.session_id
            ),
        }
        Ok(())
    }
}

/// Receiver filtered to a single session
pub struct SessionSubscription {
    session_id: SessionId,
    receiver: broadcast::Receiver<SessionEvent>,
}

impl SessionSubscription {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next event of this session; `None` once the feed is closed
    ///
    /// Lagged events are skipped.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.session_id == self.session_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        "Subscription for session {} lagged by {} events",
                        self.session_id, skipped
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_receiver(self) -> broadcast::Receiver<SessionEvent> {
        self.receiver
    }
}
