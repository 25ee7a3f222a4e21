//! marketplace-realtime server entry point.
//!
//! Starts the Axum HTTP server with the WebSocket and REST endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use marketplace_realtime::app_state::AppState;
use marketplace_realtime::build_app;
use marketplace_realtime::config::{LogFormat, RealtimeConfig};
use marketplace_realtime::domain::{AuditSink, NotificationJournal, TracingAuditSink, UpdateSource};
use marketplace_realtime::persistence::{
    ModerationDecisionSource, PostgresAuditSink, SellerApplicationSource,
};

/// How often expired journal entries are dropped.
const JOURNAL_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = RealtimeConfig::from_env().context("loading configuration")?;

    // Initialize tracing
    init_tracing(config.log_format);
    tracing::info!(
        addr = %config.listen_addr,
        env = %config.app_env,
        version = env!("CARGO_PKG_VERSION"),
        "starting marketplace-realtime"
    );
    if config.jwt_secret == marketplace_realtime::config::DEVELOPMENT_SECRET {
        tracing::warn!("JWT_SECRET unset; using the development secret");
    }

    // Build collaborators
    let mut sources: Vec<Arc<dyn UpdateSource>> = Vec::new();
    let audit_sink: Arc<dyn AuditSink> = if config.persistence_enabled {
        tracing::info!("connecting to database");
        let db = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await
            .context("connecting to PostgreSQL")?;
        sqlx::migrate!()
            .run(&db)
            .await
            .context("running migrations")?;
        tracing::info!("database ready");
        sources.push(Arc::new(ModerationDecisionSource::new(db.clone())));
        sources.push(Arc::new(SellerApplicationSource::new(db.clone())));
        Arc::new(PostgresAuditSink::new(db))
    } else {
        tracing::info!("persistence disabled; reconciliation uses the live journal only");
        Arc::new(TracingAuditSink)
    };

    // Build application state
    let (app_state, audit_task) = AppState::from_config(&config, audit_sink, sources);
    let prune_task = tokio::spawn(prune_journal(Arc::clone(&app_state.journal)));

    // Build router
    let app = build_app(app_state.clone(), config.http_request_timeout);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let shutdown_state = app_state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let evicted = shutdown_state.gate.evict_all().await;
            shutdown_state.throttler.shutdown().await;
            tracing::info!(evicted, "live connections closed");
        })
        .await
        .context("serving")?;

    prune_task.abort();
    drop(app_state);
    if tokio::time::timeout(Duration::from_secs(5), audit_task).await.is_err() {
        tracing::warn!("audit queue not drained before exit");
    }
    tracing::info!("server shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn prune_journal(journal: Arc<NotificationJournal>) {
    let mut ticker = tokio::time::interval(JOURNAL_PRUNE_INTERVAL);
    loop {
        ticker.tick().await;
        journal.prune().await;
    }
}

/// Completes on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
