use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers::{self, AppState};
use crate::store::Store;

pub fn create_router<S: Store + 'static>() -> Router<Arc<AppState<S>>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // NTLM handshake
        .route("/auth/challenge", post(handlers::auth_challenge::<S>))
        // Location service
        .route("/location/connect", post(handlers::location_connect::<S>))
        .route(
            "/location/query-services",
            post(handlers::location_query_services::<S>),
        )
        // Catalog service
        .route(
            "/catalog/query-nodes",
            post(handlers::catalog_query_nodes::<S>),
        )
        .route(
            "/catalog/query-resources",
            post(handlers::catalog_query_resources::<S>),
        )
        // Registration service, "-" selects every tool
        .route(
            "/registration/:tool_id/entries",
            get(handlers::registration_get_entries::<S>),
        )
}
