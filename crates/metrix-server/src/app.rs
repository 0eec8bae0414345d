use crate::state::AppState;
use crate::{api, logging, middleware as mw};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

/// Builds the HTTP router.
///
/// Layers run outermost first: request logging, trusted subnet check,
/// signature check, payload decryption, then gzip handling around the
/// handlers.
pub fn build_http_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::list_metrics))
        .route("/ping", get(api::ping))
        .route("/update/", post(api::update_json))
        .route("/update/{kind}/{name}/{value}", post(api::update_path))
        .route("/updates/", post(api::update_batch))
        .route("/value/", post(api::value_json))
        .route("/value/{kind}/{name}", get(api::value_text))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::decrypt_body,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::verify_signature,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::trusted_subnet,
        ))
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}
