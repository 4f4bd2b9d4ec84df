use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::middleware::tracing::request_id_middleware;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    app::health_check,
    metrics::metrics,
    settlement::{
        close_settlement, get_settlement, open_settlement, print_complete, refresh_settlement,
        settle,
    },
};
use crate::middleware::metrics::metrics_middleware;
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/settlements", post(open_settlement))
        .route(
            "/settlements/:id",
            get(get_settlement).delete(close_settlement),
        )
        .route("/settlements/:id/refresh", post(refresh_settlement))
        .route("/settlements/:id/settle", post(settle))
        .route("/settlements/:id/print-complete", post(print_complete))
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
