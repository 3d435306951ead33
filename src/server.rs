//! HTTP export surface.
//!
//! Two routes: the configurable telemetry path serving the exposition
//! payload, and a landing page at the root linking to it. Unmatched paths
//! fall through to axum's default 404.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::collector::Registry;
use crate::exposition::TEXT_FORMAT_CONTENT_TYPE;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub landing_page: String,
}

/// Render the landing page for a telemetry path.
pub fn landing_page(telemetry_path: &str) -> String {
    format!(
        "<html>\n<head><title>Postgres exporter</title></head>\n<body>\n\
         <h1>Postgres exporter</h1>\n\
         <p><a href='{telemetry_path}'>Metrics</a></p>\n\
         </body>\n</html>\n"
    )
}

/// Create the router with the metrics endpoint mounted at `telemetry_path`.
pub fn create_router(state: AppState, telemetry_path: &str) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/", get(landing_handler))
        .route(telemetry_path, get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Landing page handler.
async fn landing_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.landing_page.clone())
}

/// Scrape endpoint: renders current samples from every registered
/// collector. The request blocks until all collectors finish.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.render().await {
        Ok(body) => {
            ([(header::CONTENT_TYPE, TEXT_FORMAT_CONTENT_TYPE)], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics").into_response()
        }
    }
}
