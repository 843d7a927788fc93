//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the orchestrator
//! to its collaborators, runs the HTTP servers and manages background tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::publisher::{
    AmqpEventPublisher, CompositeEventPublisher, EventPublisher, PublisherConfig,
};
use crate::config::AppConfig;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::rating::glicko2::Glicko2RatingCalculator;
use crate::resolution::judge::{HttpJudgeOracle, JudgeOracle};
use crate::resolution::resolver::Resolver;
use crate::resolution::transcript::InMemoryTranscriptStore;
use crate::service::api;
use crate::session::feed::{ChangeFeed, DEFAULT_FEED_CAPACITY};
use crate::session::manager::{ManagerSettings, SessionManager};
use crate::session::store::InMemorySessionStore;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Cloneable view of the running service
///
/// Shared by the command API, the health server and background tasks.
#[derive(Clone)]
pub struct ServiceHandle {
    config: Arc<AppConfig>,
    manager: SessionManager,
    feed: ChangeFeed,
    metrics: Arc<MetricsCollector>,
    amqp_connection: Option<Arc<AmqpConnection>>,
    is_running: Arc<RwLock<bool>>,
}

impl ServiceHandle {
    /// Wire the orchestrator over in-memory storage and messaging
    ///
    /// Session events go to the in-process change feed and, when given, to
    /// `fanout` as well.
    pub fn assemble(
        config: AppConfig,
        oracle: Arc<dyn JudgeOracle>,
        fanout: Option<Arc<dyn EventPublisher>>,
        metrics: Arc<MetricsCollector>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(InMemorySessionStore::new());
        let transcripts = Arc::new(InMemoryTranscriptStore::new());
        let feed = ChangeFeed::new(DEFAULT_FEED_CAPACITY);

        let mut publisher = CompositeEventPublisher::new().with(Arc::new(feed.clone()));
        if let Some(fanout) = fanout {
            publisher = publisher.with(fanout);
        }
        info!("Session events fan out to {} publishers", publisher.len());

        let calculator = Glicko2RatingCalculator::new(&config.rating).map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to initialize rating calculator: {}", e),
            }
        })?;

        let resolver = Resolver::new(
            oracle,
            transcripts.clone(),
            config.judge_timeout(),
            config.judge.ai_identity.clone(),
        )
        .with_metrics(metrics.clone());

        let manager = SessionManager::new(
            store,
            resolver,
            Arc::new(calculator),
            Arc::new(publisher),
            transcripts,
            ManagerSettings::from_config(&config),
        )
        .with_metrics(metrics.clone());

        Ok(Self {
            config: Arc::new(config),
            manager,
            feed,
            metrics,
            amqp_connection,
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// In-memory service calling the configured Judge endpoint, without AMQP
    pub fn in_memory(config: AppConfig, metrics: Arc<MetricsCollector>) -> Result<Self, ServiceError> {
        let oracle = HttpJudgeOracle::new(config.judge.endpoint.clone(), config.judge_timeout())
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create Judge client: {}", e),
            })?;
        Self::assemble(config, Arc::new(oracle), None, metrics, None)
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Get the session orchestrator
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Get the in-process change feed
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// AMQP connection state, `None` when the fan-out is disabled
    pub fn amqp_open(&self) -> Option<bool> {
        self.amqp_connection.as_ref().map(|c| c.is_open())
    }

    async fn close_amqp(&self) {
        let Some(connection) = &self.amqp_connection else {
            return;
        };
        if !connection.is_open() {
            return;
        }
        match connection.close().await {
            Ok(()) => info!("✅ AMQP connection closed"),
            Err(e) => warn!("Failed to close AMQP connection: {}", e),
        }
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn set_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }
}

/// Main application state containing all service components
pub struct AppState {
    handle: ServiceHandle,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// Stops the command API server
    api_shutdown: broadcast::Sender<()>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing debate-arena session orchestrator");
        info!(
            "Configuration: service={}, judge={}, amqp_enabled={}",
            config.service.name, config.judge.endpoint, config.amqp.enabled
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (amqp_connection, fanout) = if config.amqp.enabled {
            let (connection, publisher) = Self::initialize_amqp(&config).await?;
            (Some(connection), Some(publisher))
        } else {
            info!("AMQP fan-out disabled, events stay in-process");
            (None, None)
        };

        let oracle = HttpJudgeOracle::new(config.judge.endpoint.clone(), config.judge_timeout())
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create Judge client: {}", e),
            })?;

        let handle = ServiceHandle::assemble(
            config,
            Arc::new(oracle),
            fanout,
            metrics_collector.clone(),
            amqp_connection,
        )?;

        let metrics_service = Self::initialize_metrics(&handle, metrics_collector);
        let (api_shutdown, _) = broadcast::channel(1);

        Ok(Self {
            handle,
            metrics_service,
            background_tasks: Vec::new(),
            api_shutdown,
        })
    }

    /// Start the HTTP servers and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting debate-arena service");

        self.handle.set_running(true).await;

        // Start metrics service first
        self.start_metrics_service().await?;

        self.start_api_server().await?;

        self.start_background_tasks().await?;

        info!("✅ Debate-arena service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of debate-arena service");

        self.handle.set_running(false).await;

        // Pending fallback offers and vote timeouts die with the process
        self.handle.manager().shutdown();

        if self.api_shutdown.send(()).is_err() {
            debug!("Command API server already stopped");
        }

        self.stop_background_tasks().await;

        self.handle.close_amqp().await;

        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        let final_stats =
            self.handle
                .manager()
                .get_stats()
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ Debate-arena service shutdown completed");

        Ok(())
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        self.handle.config()
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        self.handle.is_running().await
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Initialize metrics service
    fn initialize_metrics(
        handle: &ServiceHandle,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Arc<MetricsService> {
        let config = handle.config();
        info!(
            "Initializing metrics service on port {}",
            config.service.metrics_port
        );

        let health_config = HealthServerConfig {
            port: config.service.metrics_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone()).with_service(handle.clone()),
        );
        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    /// Start metrics service
    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config().service.metrics_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        self.background_tasks.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    /// Start the command API server
    async fn start_api_server(&mut self) -> Result<(), ServiceError> {
        let port = self.config().service.http_port;
        let addr = format!("0.0.0.0:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to bind command API on {}: {}", addr, e),
            }
        })?;

        let router = api::router(self.handle.clone());
        let mut shutdown_rx = self.api_shutdown.subscribe();

        let api_handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    info!("Command API shutdown signal received");
                })
                .await;
            match served {
                Ok(()) => info!("Command API server stopped"),
                Err(e) => error!("Command API server failed: {}", e),
            }
        });
        self.background_tasks.push(api_handle);

        info!("✅ Command API listening on http://{}", addr);
        Ok(())
    }

    /// Connect to the broker and declare the session events exchange
    async fn initialize_amqp(
        config: &AppConfig,
    ) -> Result<(Arc<AmqpConnection>, Arc<dyn EventPublisher>), ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let mut amqp_config =
            AmqpConfig::from_url(&config.amqp.url).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;
        amqp_config.max_retries = config.amqp.max_retry_attempts;
        amqp_config.retry_delay_ms = config.amqp.retry_delay_ms;

        let connection = tokio::time::timeout(
            config.amqp_connection_timeout(),
            AmqpConnection::new(amqp_config),
        )
        .await
        .map_err(|_| ServiceError::AmqpConnection {
            message: format!(
                "Timed out connecting to AMQP after {:?}",
                config.amqp_connection_timeout()
            ),
        })?
        .map_err(|e| ServiceError::AmqpConnection {
            message: format!("Failed to connect to AMQP: {}", e),
        })?;

        let channel = connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange_name: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        info!(
            "✅ AMQP fan-out ready on exchange '{}'",
            config.amqp.exchange_name
        );
        let publisher: Arc<dyn EventPublisher> = Arc::new(publisher);
        Ok((Arc::new(connection), publisher))
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(&mut self) -> Result<(), ServiceError> {
        info!("Starting background maintenance tasks...");

        // Session metrics refresh
        let metrics_task = {
            let manager = self.handle.manager().clone();
            let handle = self.handle.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                info!("Session metrics task started");

                while handle.is_running().await {
                    interval.tick().await;

                    match manager.get_stats() {
                        Ok(stats) => debug!(
                            "Updated session metrics - sessions: {:?}, participants: {}, timers: {}",
                            stats.sessions_by_state, stats.participants, stats.armed_timers
                        ),
                        Err(e) => warn!("Failed to get session stats for metrics update: {}", e),
                    }
                }

                info!("Session metrics task stopped");
            })
        };

        // Stale waiting session sweep
        let cleanup_interval = self.config().cleanup_interval();
        info!(
            "Starting stale session sweep ({}s interval, max wait {}s)...",
            cleanup_interval.as_secs(),
            self.config().max_wait().as_secs()
        );
        let cleanup_task = {
            let manager = self.handle.manager().clone();
            let handle = self.handle.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                info!("Stale session sweep started");

                while handle.is_running().await {
                    interval.tick().await;

                    match manager.cleanup_stale_sessions().await {
                        Ok(0) => debug!("Sweep completed - no stale waiting sessions"),
                        Ok(cancelled) => info!("Cancelled {} stale waiting sessions", cancelled),
                        Err(e) => warn!("Stale session sweep failed: {}", e),
                    }
                }

                info!("Stale session sweep stopped");
            })
        };

        // Service health metrics
        let health_metrics_task = {
            let handle = self.handle.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let start_time = tokio::time::Instant::now();
                info!("Health metrics task started");

                while handle.is_running().await {
                    interval.tick().await;

                    let metrics = handle.metrics();
                    let uptime_seconds = start_time.elapsed().as_secs() as i64;
                    metrics.service().uptime_seconds.set(uptime_seconds);

                    let store_ok = handle.manager().get_stats().is_ok();
                    let amqp_ok = handle.amqp_open().unwrap_or(true);
                    metrics.update_component_health("session_store", store_ok);
                    metrics.update_component_health("amqp", amqp_ok);
                    metrics.update_health_status(match (store_ok, amqp_ok) {
                        (true, true) => 2,
                        (true, false) => 1,
                        _ => 0,
                    });

                    debug!(
                        "Updated service health metrics - uptime: {}s",
                        uptime_seconds
                    );
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(metrics_task);
        self.background_tasks.push(cleanup_task);
        self.background_tasks.push(health_metrics_task);

        info!("3 background maintenance tasks started successfully");
        Ok(())
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        // Give tasks time to clean up gracefully
        tokio::time::sleep(Duration::from_millis(500)).await;

        info!("✅ All {} background tasks stopped", task_count);
    }
}
