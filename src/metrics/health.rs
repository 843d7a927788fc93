//! Health check endpoints and Prometheus metrics server
//!
//! This module provides HTTP endpoints for health checks and Prometheus metrics
//! for the debate arena service using Axum.

use crate::metrics::collector::MetricsCollector;
use crate::service::app::ServiceHandle;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "debate-arena";

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    /// Port to bind the health server to
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub service: Option<ServiceHandle>,
}

/// Health server that provides HTTP endpoints for monitoring
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    /// Create a new health server
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                service: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the running service for health checks
    pub fn with_service(mut self, service: ServiceHandle) -> Self {
        self.state.service = Some(service);
        self
    }

    /// Start the health server
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr).await?;

        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    /// Create the Axum router with all health endpoints
    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    /// Stop the health server
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping health server...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to health server: {}", e);
        }

        Ok(())
    }
}

/// Root endpoint handler - shows service information
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/stats"
        ]
    }))
}

fn status_body(status: &str) -> serde_json::Value {
    json!({
        "status": status,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    })
}

/// Lightweight health check endpoint handler
async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");

    let Some(service) = &state.service else {
        let mut body = status_body("unhealthy");
        body["error"] = json!("Service not initialized");
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body));
    };

    match HealthCheck::liveness_check(service).await {
        HealthStatus::Healthy => (StatusCode::OK, Json(status_body("healthy"))),
        HealthStatus::Degraded => (StatusCode::OK, Json(status_body("degraded"))),
        HealthStatus::Unhealthy => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(status_body("unhealthy")),
        ),
    }
}

/// Readiness check endpoint handler
async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Readiness check requested");

    match &state.service {
        Some(service) => match HealthCheck::readiness_check(service).await {
            HealthStatus::Healthy => (StatusCode::OK, "Ready"),
            HealthStatus::Degraded => (StatusCode::OK, "Degraded but ready"),
            HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

/// Liveness check endpoint handler
async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Liveness check requested");

    match &state.service {
        Some(service) => match HealthCheck::liveness_check(service).await {
            HealthStatus::Healthy => (StatusCode::OK, "Alive"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Metrics endpoint requested");

    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(output) => {
            debug!("Serving {} metric families", metric_families.len());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, encoder.format_type().to_string())],
                output,
            )
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                "Failed to encode metrics".to_string(),
            )
        }
    }
}

/// Detailed service statistics endpoint handler
async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Stats endpoint requested");

    let Some(service) = &state.service else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "service": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": "error"
                },
                "error": "Service not initialized",
                "timestamp": chrono::Utc::now()
            })),
        );
    };

    let health = HealthCheck::check(service).await;
    let stats = json!({
        "service": {
            "name": health.service,
            "version": env!("CARGO_PKG_VERSION"),
            "status": health.status,
        },
        "sessions": health.stats.sessions_by_state,
        "participants": health.stats.participants,
        "armed_timers": health.stats.armed_timers,
        "feed_subscribers": health.stats.feed_subscribers,
        "components": health.checks,
        "timestamp": chrono::Utc::now()
    });

    (StatusCode::OK, Json(stats))
}

/// Health endpoints implementation (for programmatic access)
pub struct HealthEndpoints;

impl HealthEndpoints {
    /// Get health status as JSON
    pub async fn get_health_status(service: Option<&ServiceHandle>) -> serde_json::Value {
        match service {
            Some(service) => {
                let status = HealthCheck::liveness_check(service).await;
                json!({ "status": status, "service": SERVICE_NAME })
            }
            None => json!({
                "status": "unhealthy",
                "service": SERVICE_NAME,
                "error": "Service not initialized"
            }),
        }
    }

    /// Get metrics as Prometheus text format
    pub fn get_metrics_text(metrics_collector: &MetricsCollector) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&metrics_collector.registry().gather())
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::service::app::ServiceHandle;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt; // for oneshot

    fn collector() -> Arc<MetricsCollector> {
        Arc::new(MetricsCollector::new().expect("Failed to create collector"))
    }

    async fn get(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let server = HealthServer::new(HealthServerConfig::default(), collector());
        assert_eq!(get(server.create_router(), "/").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = collector();
        collector.record_session_created("human");
        collector.update_health_status(2);

        let server = HealthServer::new(HealthServerConfig::default(), collector);
        let response = server
            .create_router()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
    }

    #[tokio::test]
    async fn test_health_endpoints_without_service() {
        let server = HealthServer::new(HealthServerConfig::default(), collector());
        let app = server.create_router();

        for uri in ["/health", "/ready", "/alive", "/stats"] {
            assert_eq!(
                get(app.clone(), uri).await,
                StatusCode::SERVICE_UNAVAILABLE,
                "{}",
                uri
            );
        }
    }

    #[tokio::test]
    async fn test_health_endpoints_with_running_service() {
        let collector = collector();
        let service = ServiceHandle::in_memory(AppConfig::default(), collector.clone()).unwrap();
        service.set_running(true).await;

        let server =
            HealthServer::new(HealthServerConfig::default(), collector).with_service(service.clone());
        let app = server.create_router();

        for uri in ["/health", "/ready", "/alive", "/stats"] {
            assert_eq!(get(app.clone(), uri).await, StatusCode::OK, "{}", uri);
        }

        service.set_running(false).await;
        assert_eq!(get(app, "/alive").await, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_health_server_config() {
        let config = HealthServerConfig::default();
        assert_eq!(config.port, 9090);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[tokio::test]
    async fn test_404_handling() {
        let server = HealthServer::new(HealthServerConfig::default(), collector());
        assert_eq!(
            get(server.create_router(), "/nonexistent").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_health_endpoints_compatibility() {
        let collector = collector();

        let health_status = HealthEndpoints::get_health_status(None).await;
        assert_eq!(health_status["status"], "unhealthy");

        let metrics_text = HealthEndpoints::get_metrics_text(&collector).unwrap();
        assert!(metrics_text.contains("debate_arena"));
    }
}
