use std::sync::Arc;

use anyhow::Result;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

mod api;
pub mod app_config;
pub mod app_tracing;
pub mod flow;
pub mod oauth;
pub mod status;
pub mod token_store;

use flow::FlowCoordinator;
use oauth::Provider;
use status::StatusStore;

pub const API_ROUTE_PREFIX: &str = "/api";
pub const HEALTH_PATH: &str = "/healthz";

/// Build the application router around the given identity provider.
pub async fn router<P: Provider>(
    config: &app_config::AppConfig,
    provider: Arc<P>,
) -> Result<Router> {
    let flow = Arc::new(FlowCoordinator::new(config, provider)?);
    let status = Arc::new(StatusStore::new(config).await?);
    let api_router = api::router(flow, status)?;

    Ok(Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .nest(API_ROUTE_PREFIX, api_router)
        .layer(app_tracing::trace_layer()))
}

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
