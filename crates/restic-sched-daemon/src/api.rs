//! Health and metrics HTTP surface.
//!
//! One unauthenticated listener serves `/health` (overall and per-job) and
//! `/metrics`. Per-job health reflects the cached result of the most recent
//! run: 503 while the last run failed, 404 for names no job ever ran under.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::metrics::METRICS;
use crate::state::ResultStore;

pub fn router(store: ResultStore) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

pub async fn serve(addr: &str, store: ResultStore) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("health API listening on http://{addr}");

    axum::serve(listener, router(store)).await?;

    Ok(())
}

async fn health(
    State(store): State<ResultStore>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(job_name) = params.get("job") else {
        return "ok".into_response();
    };

    match store.get(job_name) {
        Some(result) => {
            let status = if result.success {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };

            (status, Json(result)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"Message": "Unknown job"})),
        )
            .into_response(),
    }
}

async fn metrics() -> Response {
    match METRICS.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!("failed rendering metrics: {err}");

            (StatusCode::INTERNAL_SERVER_ERROR, "failed rendering metrics").into_response()
        }
    }
}
