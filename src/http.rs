use crate::activity::ActivityTracker;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::state::SnapshotStore;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{debug, error};

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub store: Arc<SnapshotStore>,
    pub activity: Arc<ActivityTracker>,
    pub config: Arc<Config>,
}

/// `dist` serves the dashboard for every path not matched by an API route.
pub fn build_router(state: HttpAppState, dist: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/config", get(config_handler))
        .with_state(state)
        .layer(cors);

    match dist {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn stats_handler(State(state): State<HttpAppState>) -> Response {
    if state.activity.record_access() {
        debug!("stats request woke the idle sampler");
    }
    state.metrics.inc_stats_request();

    match state.store.to_json().await {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(err) => {
            error!(error = %err, "failed to serialize snapshot");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to serialize snapshot: {err}"),
            )
                .into_response()
        }
    }
}

async fn config_handler(State(state): State<HttpAppState>) -> Json<Config> {
    Json(state.config.as_ref().clone())
}
