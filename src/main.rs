//! Transfer Service
//!
//! HTTP front end for the transfer orchestrator, plus the background
//! outbox relay and maintenance jobs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transfer_service::api::{self, AppState};
use transfer_service::config::{Config, LogFormat};
use transfer_service::db;
use transfer_service::jobs::JobScheduler;
use transfer_service::orchestrator::TransferOrchestrator;
use transfer_service::outbox::OutboxRelay;
use transfer_service::publisher::{EventPublisher, HttpPublisher, InMemoryBroker};
use transfer_service::store::PgTransferStore;
use transfer_service::verification::HttpVerificationClient;

/// Initialize tracing/logging
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "transfer_service=debug,tower_http=debug".into());

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Wrap the application router with tracing and request-id layers
fn build_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(api::middleware::REQUEST_ID_HEADER);

    // Layers run bottom-up: set id -> trace -> propagate -> handler
    api::app(state)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

fn build_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match &config.broker_url {
        Some(url) => {
            tracing::info!(broker_url = %url, "Publishing events to external broker");
            Ok(Arc::new(HttpPublisher::new(url.clone(), Duration::from_secs(10))?))
        }
        None => {
            tracing::warn!("BROKER_URL not set, events are delivered to the in-memory broker");
            Ok(Arc::new(InMemoryBroker::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting transfer service");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config.database_url, config.database_max_connections).await?;
    db::verify_connection(&pool).await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let store = Arc::new(PgTransferStore::new(pool.clone()));
    let verifier = Arc::new(HttpVerificationClient::new(config.verification_timeout)?);
    let orchestrator = Arc::new(TransferOrchestrator::new(
        store.clone(),
        verifier,
        config.transfer_settings(),
    ));

    let relay = OutboxRelay::with_config(store.clone(), build_publisher(&config)?, config.relay_config());
    let jobs = JobScheduler::new(store.clone(), store.clone(), relay).start();

    let app = build_router(AppState::new(orchestrator, store));

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    jobs.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
