//! Main entry point for the Debate Arena session orchestrator
//!
//! This is the production entry point that initializes and runs the
//! orchestrator with configuration loading, logging and graceful shutdown.

use anyhow::Result;
use clap::Parser;
use debate_arena::config::{validate_config, AppConfig};
use debate_arena::service::{AppState, HealthCheck};
use std::path::PathBuf;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Debate Arena - matchmaking, voting, AI arbitration and ratings for debates
#[derive(Parser)]
#[command(
    name = "debate-arena",
    version,
    about = "Session orchestrator for one-on-one debates",
    long_about = "Debate Arena pairs participants into debate sessions, collects their votes, \
                 asks an AI Judge when they disagree, and keeps Glicko-2 ratings. Session events \
                 stream to clients and can be mirrored onto an AMQP exchange."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Probe a running instance and exit
    #[arg(long, help = "Query the health endpoint of a running instance and exit")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override; also enables the AMQP fan-out
    #[arg(long, value_name = "URL", help = "Override AMQP URL and enable event fan-out")]
    amqp_url: Option<String>,

    #[arg(long, value_name = "URL", help = "Override the Judge oracle endpoint")]
    judge_url: Option<String>,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override command API port")]
    http_port: Option<u16>,

    /// Metrics port override
    #[arg(long, value_name = "PORT", help = "Override metrics server port")]
    metrics_port: Option<u16>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Query `/health` of a running instance and exit with its verdict
async fn perform_health_check(config: &AppConfig) -> Result<()> {
    let url = format!("http://127.0.0.1:{}/health", config.service.metrics_port);
    info!("Performing health check against {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    match client.get(&url).send().await {
        Ok(response) => {
            let status = response.status();
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            println!(
                "Health Check: {} ({})",
                body["status"].as_str().unwrap_or("unknown"),
                status
            );
            std::process::exit(if status.is_success() { 0 } else { 1 });
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🚀 Debate Arena Session Orchestrator");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Command API port: {}", config.service.http_port);
    info!("   Metrics port: {}", config.service.metrics_port);
    info!("   Judge: {}", config.judge.endpoint);
    if config.amqp.enabled {
        info!("   AMQP: {} ({})", config.amqp.url, config.amqp.exchange_name);
    } else {
        info!("   AMQP: disabled");
    }
    info!(
        "   Fallback delay: {}s, vote timeout: {}s, max wait: {}s",
        config.matchmaking.fallback_delay_seconds,
        config.matchmaking.vote_timeout_seconds,
        config.matchmaking.max_wait_time_seconds
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from file or environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
        config.amqp.enabled = true;
    }

    if let Some(judge_url) = &args.judge_url {
        config.judge.endpoint = judge_url.clone();
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    if let Some(metrics_port) = args.metrics_port {
        config.service.metrics_port = metrics_port;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration (CLI args can override environment/config file)
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(&config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    // Periodic health log
    let health_task = {
        let handle = app_state.handle().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            while handle.is_running().await {
                interval.tick().await;
                let health = HealthCheck::check(&handle).await;
                info!(
                    "Health check: {} - sessions {:?}, {} armed timers",
                    health.status, health.stats.sessions_by_state, health.stats.armed_timers
                );
            }
        })
    };

    info!("✅ Debate Arena is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    let shutdown_timeout = config.shutdown_timeout();
    match tokio::time::timeout(shutdown_timeout, app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("⚠️  Shutdown finished with errors: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 Debate Arena stopped");
    Ok(())
}
