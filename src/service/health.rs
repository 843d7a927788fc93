//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the debate-arena
//! service, including readiness and liveness probes.

use crate::service::app::ServiceHandle;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Stored sessions per lifecycle state
    pub sessions_by_state: BTreeMap<String, usize>,
    /// Participants with at least one rated debate
    pub participants: usize,
    /// Pending fallback and vote timers
    pub armed_timers: usize,
    /// Live change feed subscriptions
    pub feed_subscribers: usize,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(service: &ServiceHandle) -> Self {
        let checks = vec![
            Self::check_service_running(service).await,
            Self::check_session_store(service),
            Self::check_amqp_health(service),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |overall, check| {
                match (&overall, &check.status) {
                    (_, HealthStatus::Unhealthy) | (HealthStatus::Unhealthy, _) => {
                        HealthStatus::Unhealthy
                    }
                    (_, HealthStatus::Degraded) | (HealthStatus::Degraded, _) => {
                        HealthStatus::Degraded
                    }
                    _ => HealthStatus::Healthy,
                }
            });

        HealthCheck {
            status,
            service: service.config().service.name.clone(),
            version: std::env::var("SERVICE_VERSION").unwrap_or_else(|_| "unknown".to_string()),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(service),
        }
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(service: &ServiceHandle) -> HealthStatus {
        if service.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(service: &ServiceHandle) -> HealthStatus {
        if !service.is_running().await {
            return HealthStatus::Unhealthy;
        }

        Self::check_session_store(service).status
    }

    async fn check_service_running(service: &ServiceHandle) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if service.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// A store that cannot count its sessions cannot serve commands either
    fn check_session_store(service: &ServiceHandle) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match service.manager().get_stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Session store stats check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Stats check failed: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "session_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The broker only carries the event fan-out, so losing it degrades
    fn check_amqp_health(service: &ServiceHandle) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match service.amqp_open() {
            None => (
                HealthStatus::Healthy,
                Some("AMQP fan-out disabled".to_string()),
            ),
            Some(true) => (HealthStatus::Healthy, None),
            Some(false) => (
                HealthStatus::Degraded,
                Some("AMQP connection closed".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn gather_service_stats(service: &ServiceHandle) -> ServiceStats {
        let feed_subscribers = service.feed().subscriber_count();
        match service.manager().get_stats() {
            Ok(stats) => ServiceStats {
                sessions_by_state: stats.sessions_by_state,
                participants: stats.participants,
                armed_timers: stats.armed_timers,
                feed_subscribers,
            },
            Err(e) => {
                debug!("Failed to get session stats for health check: {}", e);
                ServiceStats {
                    feed_subscribers,
                    ..ServiceStats::default()
                }
            }
        }
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
