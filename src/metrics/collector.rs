//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the debate arena service
//! using Prometheus metrics.

use crate::types::{Outcome, SessionState};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ALL_STATES: [SessionState; 5] = [
    SessionState::Waiting,
    SessionState::Active,
    SessionState::Voting,
    SessionState::Completed,
    SessionState::Cancelled,
];

/// Main metrics collector for the debate arena service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Session lifecycle metrics
    session_metrics: SessionMetrics,

    /// Vote and arbitration metrics
    resolution_metrics: ResolutionMetrics,

    /// Rating engine metrics
    rating_metrics: RatingMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Session events published, by sink and status
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Command API requests by route and status class
    pub api_requests_total: IntCounterVec,
}

/// Session lifecycle metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Sessions currently in each state
    pub sessions_by_state: IntGaugeVec,

    /// Sessions created, by kind (human, ai, invite)
    pub sessions_created_total: IntCounterVec,

    /// Sessions paired with an opponent
    pub sessions_paired_total: IntCounter,

    /// Pairing attempts that lost a race
    pub pairing_races_lost_total: IntCounter,

    /// Sessions cancelled, by reason
    pub sessions_cancelled_total: IntCounterVec,

    /// Time from session creation to pairing
    pub pairing_wait_seconds: Histogram,

    /// AI fallback offers, by result (offered, accepted)
    pub fallback_total: IntCounterVec,
}

/// Vote and arbitration metrics
#[derive(Clone)]
pub struct ResolutionMetrics {
    /// Votes recorded
    pub votes_total: IntCounter,

    /// Completed sessions by outcome
    pub resolutions_total: IntCounterVec,

    /// Judge oracle calls by status
    pub oracle_calls_total: IntCounterVec,

    /// Judge oracle call latency
    pub oracle_duration_seconds: Histogram,

    /// Voting sessions resolved by the vote timeout
    pub vote_timeouts_total: IntCounter,
}

/// Rating engine metrics
#[derive(Clone)]
pub struct RatingMetrics {
    /// Committed rating updates
    pub rating_updates_total: IntCounter,

    /// Versioned commits that had to be recomputed
    pub commit_conflicts_total: IntCounter,

    /// Ratings after update
    pub rating_distribution: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Rating calculation time
    pub rating_calculation_duration: Histogram,

    /// Orchestrator operation durations
    pub session_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;
        let resolution_metrics = ResolutionMetrics::new(&registry)?;
        let rating_metrics = RatingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            session_metrics,
            resolution_metrics,
            rating_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get session metrics
    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    /// Get resolution metrics
    pub fn resolution(&self) -> &ResolutionMetrics {
        &self.resolution_metrics
    }

    /// Get rating metrics
    pub fn rating(&self) -> &RatingMetrics {
        &self.rating_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh the per-state session gauges from store counts
    pub fn update_session_counts(&self, counts: &HashMap<SessionState, usize>) {
        for state in ALL_STATES {
            let count = counts.get(&state).copied().unwrap_or(0);
            self.session_metrics
                .sessions_by_state
                .with_label_values(&[&state.to_string()])
                .set(count as i64);
        }
    }

    /// Record a session being created (`human`, `ai` or `invite`)
    pub fn record_session_created(&self, kind: &str) {
        self.session_metrics
            .sessions_created_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record a waiting session being paired after `waited`
    pub fn record_session_paired(&self, waited: Duration) {
        self.session_metrics.sessions_paired_total.inc();
        self.session_metrics
            .pairing_wait_seconds
            .observe(waited.as_secs_f64());
    }

    pub fn record_pairing_race_lost(&self) {
        self.session_metrics.pairing_races_lost_total.inc();
    }

    /// Record a cancellation (`user`, `fallback`, `expired`)
    pub fn record_session_cancelled(&self, reason: &str) {
        self.session_metrics
            .sessions_cancelled_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Record an AI fallback step (`offered`, `accepted`)
    pub fn record_fallback(&self, step: &str) {
        self.session_metrics
            .fallback_total
            .with_label_values(&[step])
            .inc();
    }

    pub fn record_vote(&self) {
        self.resolution_metrics.votes_total.inc();
    }

    pub fn record_vote_timeout(&self) {
        self.resolution_metrics.vote_timeouts_total.inc();
    }

    /// Record a session completing with `outcome`
    pub fn record_resolution(&self, outcome: Outcome) {
        self.resolution_metrics
            .resolutions_total
            .with_label_values(&[outcome.as_label()])
            .inc();
    }

    /// Record a Judge oracle call
    pub fn record_oracle_call(&self, success: bool, duration: Duration) {
        let status = if success { "success" } else { "failed" };
        self.resolution_metrics
            .oracle_calls_total
            .with_label_values(&[status])
            .inc();
        self.resolution_metrics
            .oracle_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a committed rating update with the new ratings
    pub fn record_rating_update(&self, new_ratings: &[f64]) {
        self.rating_metrics.rating_updates_total.inc();
        for rating in new_ratings {
            self.rating_metrics.rating_distribution.observe(*rating);
        }
    }

    pub fn record_commit_conflict(&self) {
        self.rating_metrics.commit_conflicts_total.inc();
    }

    /// Record rating calculation duration
    pub fn record_rating_calculation(&self, duration: Duration) {
        self.performance_metrics
            .rating_calculation_duration
            .observe(duration.as_secs_f64());
    }

    /// Record orchestrator operation duration
    pub fn record_session_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .session_operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record an event publish to `sink`
    pub fn record_event_published(&self, sink: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .events_published_total
            .with_label_values(&[sink, status])
            .inc();
    }

    /// Record a command API request
    pub fn record_api_request(&self, route: &str, status: u16) {
        let class = format!("{}xx", status / 100);
        self.service_metrics
            .api_requests_total
            .with_label_values(&[route, &class])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("debate_arena_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "debate_arena_events_published_total",
                "Session events published",
            ),
            &["sink", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "debate_arena_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("debate_arena_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let api_requests_total = IntCounterVec::new(
            Opts::new("debate_arena_api_requests_total", "Command API requests"),
            &["route", "status"],
        )?;
        registry.register(Box::new(api_requests_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            events_published_total,
            health_status,
            component_health,
            api_requests_total,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let sessions_by_state = IntGaugeVec::new(
            Opts::new("debate_arena_sessions", "Sessions currently in each state"),
            &["state"],
        )?;
        registry.register(Box::new(sessions_by_state.clone()))?;

        let sessions_created_total = IntCounterVec::new(
            Opts::new("debate_arena_sessions_created_total", "Sessions created"),
            &["kind"],
        )?;
        registry.register(Box::new(sessions_created_total.clone()))?;

        let sessions_paired_total = IntCounter::new(
            "debate_arena_sessions_paired_total",
            "Waiting sessions paired with an opponent",
        )?;
        registry.register(Box::new(sessions_paired_total.clone()))?;

        let pairing_races_lost_total = IntCounter::new(
            "debate_arena_pairing_races_lost_total",
            "Pairing attempts that lost a race",
        )?;
        registry.register(Box::new(pairing_races_lost_total.clone()))?;

        let sessions_cancelled_total = IntCounterVec::new(
            Opts::new("debate_arena_sessions_cancelled_total", "Sessions cancelled"),
            &["reason"],
        )?;
        registry.register(Box::new(sessions_cancelled_total.clone()))?;

        let pairing_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "debate_arena_pairing_wait_seconds",
                "Time from session creation to pairing",
            )
            .buckets(vec![1.0, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        registry.register(Box::new(pairing_wait_seconds.clone()))?;

        let fallback_total = IntCounterVec::new(
            Opts::new("debate_arena_fallback_total", "AI fallback offers"),
            &["step"],
        )?;
        registry.register(Box::new(fallback_total.clone()))?;

        Ok(Self {
            sessions_by_state,
            sessions_created_total,
            sessions_paired_total,
            pairing_races_lost_total,
            sessions_cancelled_total,
            pairing_wait_seconds,
            fallback_total,
        })
    }
}

impl ResolutionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let votes_total = IntCounter::new("debate_arena_votes_total", "Votes recorded")?;
        registry.register(Box::new(votes_total.clone()))?;

        let resolutions_total = IntCounterVec::new(
            Opts::new(
                "debate_arena_resolutions_total",
                "Completed sessions by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(resolutions_total.clone()))?;

        let oracle_calls_total = IntCounterVec::new(
            Opts::new("debate_arena_oracle_calls_total", "Judge oracle calls"),
            &["status"],
        )?;
        registry.register(Box::new(oracle_calls_total.clone()))?;

        let oracle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "debate_arena_oracle_duration_seconds",
                "Judge oracle call latency",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(oracle_duration_seconds.clone()))?;

        let vote_timeouts_total = IntCounter::new(
            "debate_arena_vote_timeouts_total",
            "Voting sessions resolved by timeout",
        )?;
        registry.register(Box::new(vote_timeouts_total.clone()))?;

        Ok(Self {
            votes_total,
            resolutions_total,
            oracle_calls_total,
            oracle_duration_seconds,
            vote_timeouts_total,
        })
    }
}

impl RatingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let rating_updates_total = IntCounter::new(
            "debate_arena_rating_updates_total",
            "Committed rating updates",
        )?;
        registry.register(Box::new(rating_updates_total.clone()))?;

        let commit_conflicts_total = IntCounter::new(
            "debate_arena_rating_commit_conflicts_total",
            "Rating commits recomputed after a version conflict",
        )?;
        registry.register(Box::new(commit_conflicts_total.clone()))?;

        let rating_distribution = Histogram::with_opts(
            HistogramOpts::new("debate_arena_rating_distribution", "Participant ratings")
                .buckets(vec![
                    1000.0, 1200.0, 1350.0, 1500.0, 1650.0, 1800.0, 2000.0, 2500.0,
                ]),
        )?;
        registry.register(Box::new(rating_distribution.clone()))?;

        Ok(Self {
            rating_updates_total,
            commit_conflicts_total,
            rating_distribution,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let rating_calculation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "debate_arena_rating_calculation_duration_seconds",
                "Rating calculation time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(rating_calculation_duration.clone()))?;

        let session_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "debate_arena_session_operation_duration_seconds",
                "Session operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["operation"],
        )?;
        registry.register(Box::new(session_operation_duration.clone()))?;

        Ok(Self {
            rating_calculation_duration,
            session_operation_duration,
        })
    }
}
