//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the WebSocket relay endpoint, and the OpenAPI
//! document.

use crate::{
    handlers,
    models::{ErrorResponse, SessionTokenResponse},
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, http::HeaderValue, routing::get};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::warn;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::get_session_token, handlers::get_metadata),
    components(schemas(SessionTokenResponse, ErrorResponse)),
    tags(
        (name = "Voice Agent Relay", description = "Session tokens and metadata for the voice-agent WebSocket relay")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config.cors_origins);

    Router::new()
        .route("/api/session", get(handlers::get_session_token))
        .route("/api/metadata", get(handlers::get_metadata))
        .route("/api/voice-agent", get(ws_handler))
        .with_state(app_state)
        .layer(cors)
}

/// CORS for the browser frontend. Credentials are allowed, so methods and
/// headers are mirrored rather than wildcarded.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| warn!(%origin, "Ignoring invalid CORS origin"))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_rest_endpoints() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/session"));
        assert!(doc.paths.paths.contains_key("/api/metadata"));
    }
}
