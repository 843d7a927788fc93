//! AMQP fan-out of session events
//!
//! This module handles the broker connection and the outbound publisher that
//! mirrors session state changes onto a topic exchange.

pub mod connection;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use messages::*;
pub use publisher::{
    AmqpEventPublisher, CompositeEventPublisher, EventPublisher, MockEventPublisher,
    PublisherConfig,
};
