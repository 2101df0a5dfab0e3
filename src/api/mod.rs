//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use crate::orchestrator::TransferOrchestrator;
use crate::store::TransferStore;

pub use routes::create_router;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransferOrchestrator>,
    pub store: Arc<dyn TransferStore>,
}

impl AppState {
    pub fn new(orchestrator: Arc<TransferOrchestrator>, store: Arc<dyn TransferStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Build the application router: `/health` plus the versioned API
pub fn app(state: AppState) -> axum::Router {
    let api_router = create_router().layer(axum::middleware::from_fn(middleware::logging_middleware));

    axum::Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api_router)
        .with_state(state)
}
