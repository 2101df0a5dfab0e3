//! Common test utilities
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Path, http::StatusCode, routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use transfer_service::orchestrator::{TransferOrchestrator, TransferSettings};
use transfer_service::store::TransferStore;
use transfer_service::verification::HttpVerificationClient;

const SCHEMA: &str = include_str!("../../migrations/0001_transfer_service.sql");

/// Setup test database - apply schema and truncate tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("Failed to apply schema");
    }

    sqlx::query("TRUNCATE TABLE transfer_records, outbox_messages, transfer_idempotency_keys")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}

/// Answers `GET /response/:code` with that status and `GET /slow/:ms` with
/// 200 after sleeping. Returns the base URL.
pub async fn spawn_verification_server() -> String {
    async fn respond(Path(code): Path<u16>) -> (StatusCode, String) {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
        (status, format!("Response with status {}", code))
    }

    async fn slow(Path(ms): Path<u64>) -> &'static str {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        "late"
    }

    let app = Router::new()
        .route("/response/:code", get(respond))
        .route("/slow/:ms", get(slow));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// A server that reads one request, writes `reply` verbatim and closes the
/// connection. An empty reply hangs up without answering.
pub async fn spawn_raw_server(reply: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(reply).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{}", addr)
}

/// A server that answers with bytes that are not HTTP
pub async fn spawn_garbage_server() -> String {
    spawn_raw_server(b"NOT-HTTP garbage\r\n\r\n").await
}

/// An address nothing listens on
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Orchestrator calling `verification_url` over real HTTP
pub fn orchestrator(
    store: Arc<dyn TransferStore>,
    verification_url: String,
    timeout: Duration,
) -> TransferOrchestrator {
    let verifier = HttpVerificationClient::new(timeout).unwrap();
    TransferOrchestrator::new(
        store,
        Arc::new(verifier),
        TransferSettings {
            verification_url,
            verification_timeout: timeout,
            ..TransferSettings::default()
        },
    )
}
