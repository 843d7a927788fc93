//! Service layer for the debate-arena orchestrator
//!
//! This module contains the main application state, the command API, health
//! checks and background task management for the production service.

pub mod api;
pub mod app;
pub mod health;

pub use api::{router, ApiError};
pub use app::{AppState, ServiceError, ServiceHandle};
pub use health::{HealthCheck, HealthStatus};
