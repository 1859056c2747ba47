//! Admin API and dashboard, served away from the data plane.

pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::config::Config;
use crate::route::SharedTable;
use handlers::{get_config, get_dashboard, get_health, get_routes, AdminState};

pub fn router(config: Arc<Config>, table: Arc<SharedTable>) -> Router {
    let state = AdminState { config, table };
    Router::new()
        .route("/", get(get_dashboard))
        .route("/api/routes", get(get_routes))
        .route("/api/config", get(get_config))
        .route("/health", get(get_health))
        .with_state(state)
}

/// Serve the admin endpoint. Runs for the process lifetime.
pub async fn serve(
    config: Arc<Config>,
    table: Arc<SharedTable>,
) -> Result<(), std::io::Error> {
    let addr = config.admin.addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Admin server listening");
    axum::serve(listener, router(config, table)).await
}
