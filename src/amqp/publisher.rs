//! Session event publishing
//!
//! [`EventPublisher`] is the change-notification seam. The in-process feed
//! and the AMQP fan-out both implement it; [`CompositeEventPublisher`] fans
//! one event out to several of them.

use crate::amqp::messages::MessageEnvelope;
use crate::error::{DebateError, Result};
use crate::types::SessionEvent;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing session state changes
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_session_event(&self, event: SessionEvent) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: crate::amqp::messages::SESSION_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: std::sync::Mutex<std::collections::HashSet<String>>, // For deduplication
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published_messages: std::sync::Mutex::new(std::collections::HashSet::new()),
        };

        publisher.setup_exchange().await?;

        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic");
        self.channel
            .exchange_declare(args)
            .await
            .map_err(|e| DebateError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange_name, e
                ),
            })?;

        info!(
            "Successfully declared session events exchange '{}'",
            self.config.exchange_name
        );
        Ok(())
    }

    /// Publish an envelope with retry and deduplication
    async fn publish_envelope(&self, envelope: &MessageEnvelope<SessionEvent>) -> Result<()> {
        if self.config.enable_deduplication {
            let published_messages =
                self.published_messages
                    .lock()
                    .map_err(|_| DebateError::InternalError {
                        message: "Failed to acquire published messages lock".to_string(),
                    })?;
            if published_messages.contains(&envelope.correlation_id) {
                debug!(
                    "Message {} already published, skipping",
                    envelope.correlation_id
                );
                return Ok(());
            }
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        let mut published_messages =
                            self.published_messages
                                .lock()
                                .map_err(|_| DebateError::InternalError {
                                    message: "Failed to acquire published messages lock"
                                        .to_string(),
                                })?;
                        published_messages.insert(envelope.correlation_id.clone());
                    }

                    debug!(
                        "Successfully published message {} ({}) to exchange {}",
                        envelope.correlation_id, envelope.routing_key, self.config.exchange_name
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, envelope: &MessageEnvelope<SessionEvent>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange_name, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| DebateError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_session_event(&self, event: SessionEvent) -> Result<()> {
        let envelope = MessageEnvelope::for_session_event(event);
        self.publish_envelope(&envelope).await
    }
}

/// Publishes every event to each inner publisher in order
///
/// A failing publisher is logged and does not stop the others; the first
/// error is returned once all have been tried.
#[derive(Clone, Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish_session_event(&self, event: SessionEvent) -> Result<()> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish_session_event(event.clone()).await {
                warn!(
                    "Publishing {} for session {} failed: {}",
                    event.kind.routing_key(),
                    event.session_id,
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<SessionEvent>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published events (for testing)
    pub fn get_published_events(&self) -> Vec<SessionEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Routing keys of all published events, in order
    pub fn get_published_kinds(&self) -> Vec<&'static str> {
        self.get_published_events()
            .iter()
            .map(|e| e.kind.routing_key())
            .collect()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_session_event(&self, event: SessionEvent) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}
