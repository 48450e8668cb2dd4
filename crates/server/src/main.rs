//! Cartkeeper server binary.
//!
//! Serves the cart API on port 3000 by default.
//!
//! # Background tasks
//!
//! - Audit writer: drains the audit queue into `cart.audit_log`
//! - Expiration sweeper: expires idle carts every `CART_SWEEP_INTERVAL_SECS`
//!
//! Migrations are not run on startup; apply them with `ck-cli migrate`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use cartkeeper_server::config::ServerConfig;
use cartkeeper_server::services::{AuditLog, spawn_periodic};
use cartkeeper_server::state::AppState;
use cartkeeper_server::{app, db};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ServerConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment (needed for Sentry init)
    let config = ServerConfig::from_env()?;

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cartkeeper_server=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    let (audit, audit_writer) = AuditLog::spawn(pool.clone(), config.policy.audit_queue_capacity);

    let sweeper = config.policy.sweep_interval.map(|interval| {
        tracing::info!(
            interval_secs = interval.as_secs(),
            expiry_days = config.policy.expiry_days,
            "Expiration sweeper started"
        );
        spawn_periodic(pool.clone(), config.policy.expiry_days, interval)
    });

    if config.maintenance_token.is_none() {
        tracing::warn!("CART_MAINTENANCE_TOKEN not set; maintenance endpoints are disabled");
    }

    let addr = config.socket_addr();
    let state = AppState::new(config, pool, audit);
    let router = app(state);

    tracing::info!("cartkeeper listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    // The router (and with it every AuditLog handle) is gone; let the
    // writer drain what is queued.
    if let Err(e) = audit_writer.await {
        tracing::error!(error = %e, "Audit writer task failed");
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
