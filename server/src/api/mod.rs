//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{admin, admin::BulkAdministrator, config::Config, storage::TransactionStrategy};

/// Shared application state.
pub struct AppState<T: TransactionStrategy> {
    /// Bulk administrator over the configured backend
    pub admin: Arc<BulkAdministrator<T>>,
    /// Server configuration
    pub config: Arc<Config>,
}

impl<T: TransactionStrategy> AppState<T> {
    /// Create new application state.
    #[must_use]
    pub fn new(admin: BulkAdministrator<T>, config: Config) -> Self {
        Self {
            admin: Arc::new(admin),
            config: Arc::new(config),
        }
    }
}

impl<T: TransactionStrategy> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            admin: Arc::clone(&self.admin),
            config: Arc::clone(&self.config),
        }
    }
}

/// Create the main application router.
pub fn create_router<T: TransactionStrategy + 'static>(state: AppState<T>) -> Router {
    let admin_routes = admin::router(state.clone());

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api/admin", admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
