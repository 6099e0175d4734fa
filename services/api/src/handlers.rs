//! Axum Handlers for the REST API
//!
//! Session token issuance and the metadata descriptor. The WebSocket
//! endpoint lives in [`crate::ws`].

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;

use crate::{
    models::{ErrorResponse, SessionTokenResponse},
    state::AppState,
};

pub enum ApiError {
    Unauthorized,
    ServiceUnavailable(String),
    InternalServerError {
        message: String,
        source: anyhow::Error,
    },
}

impl ApiError {
    pub fn internal(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::InternalServerError {
            message: message.into(),
            source: source.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("UNAUTHORIZED", "Unauthorized")),
            )
                .into_response(),
            ApiError::ServiceUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("SERVICE_UNAVAILABLE", message)),
            )
                .into_response(),
            ApiError::InternalServerError { message, source } => {
                error!("Internal Server Error: {:?}", source);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("INTERNAL_SERVER_ERROR", message)),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::internal("An internal server error occurred.", err)
    }
}

/// Issue a short-lived session token for the voice-agent WebSocket.
#[utoipa::path(
    get,
    path = "/api/session",
    responses(
        (status = 200, description = "Session token issued", body = SessionTokenResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_session_token(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionTokenResponse>, ApiError> {
    let issued = state.tokens.issue()?;
    Ok(Json(SessionTokenResponse {
        token: issued.token,
    }))
}

/// Return the `[meta]` table of the project descriptor as JSON.
#[utoipa::path(
    get,
    path = "/api/metadata",
    responses(
        (status = 200, description = "Contents of the descriptor's [meta] table"),
        (status = 500, description = "Descriptor missing or unreadable", body = ErrorResponse)
    )
)]
pub async fn get_metadata(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = &state.config.metadata_path;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let read_failed = || format!("Failed to read metadata from {file_name}");

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ApiError::internal(read_failed(), e))?;
    let mut descriptor = content
        .parse::<toml::Table>()
        .map_err(|e| ApiError::internal(read_failed(), e))?;

    let Some(meta @ toml::Value::Table(_)) = descriptor.remove("meta") else {
        return Err(ApiError::internal(
            format!("Missing [meta] section in {file_name}"),
            anyhow::anyhow!("{} has no [meta] table", path.display()),
        ));
    };

    Ok(Json(toml_to_json(meta)))
}

/// TOML to JSON with datetimes rendered as their TOML text.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    use serde_json::Value as JsonValue;

    match value {
        toml::Value::String(s) => JsonValue::String(s),
        toml::Value::Integer(i) => JsonValue::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
        toml::Value::Boolean(b) => JsonValue::Bool(b),
        toml::Value::Datetime(dt) => JsonValue::String(dt.to_string()),
        toml::Value::Array(items) => JsonValue::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => JsonValue::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use crate::{config::Config, router::create_router, state::AppState};
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use std::{io::Write, path::PathBuf, sync::Arc};
    use tower::ServiceExt;

    fn test_state(metadata_path: PathBuf) -> Arc<AppState> {
        let mut config = Config::new(
            SecretString::from("test-deepgram-key".to_string()),
            "ws://127.0.0.1:1/agent",
        );
        config.metadata_path = metadata_path;
        Arc::new(AppState::new(config))
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should be readable")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).expect("body should be JSON");
        (status, body)
    }

    fn descriptor(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
        file.write_all(contents.as_bytes())
            .expect("descriptor should be written");
        file
    }

    #[tokio::test]
    async fn session_endpoint_issues_a_valid_token() {
        let state = test_state(PathBuf::from("missing.toml"));
        let (status, body) = get(state.clone(), "/api/session").await;

        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().expect("token should be a string");
        assert!(state.tokens.validate(token));
        assert_eq!(body.as_object().map(|o| o.len()), Some(1));
    }

    #[tokio::test]
    async fn metadata_returns_meta_table() {
        let file = descriptor(
            r#"
[meta]
title = "Voice Agent Starter"
tags = ["voice", "agent"]

[build]
command = "cargo build"
"#,
        );
        let (status, body) = get(test_state(file.path().to_path_buf()), "/api/metadata").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "title": "Voice Agent Starter", "tags": ["voice", "agent"] })
        );
    }

    #[tokio::test]
    async fn metadata_renders_datetimes_as_strings() {
        let file = descriptor(
            r#"
[meta]
released = 2024-05-01
updated = 2024-05-01T12:30:00Z
ratio = 0.5
"#,
        );
        let (status, body) = get(test_state(file.path().to_path_buf()), "/api/metadata").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "released": "2024-05-01",
                "updated": "2024-05-01T12:30:00Z",
                "ratio": 0.5
            })
        );
    }

    #[tokio::test]
    async fn metadata_without_meta_section_is_an_error() {
        let file = descriptor("[build]\ncommand = \"cargo build\"\n");
        let (status, body) = get(test_state(file.path().to_path_buf()), "/api/metadata").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "INTERNAL_SERVER_ERROR");
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .starts_with("Missing [meta] section")
        );
    }

    #[tokio::test]
    async fn metadata_read_failure_is_an_error() {
        let (status, body) = get(
            test_state(PathBuf::from("/definitely/not/here/deepgram.toml")),
            "/api/metadata",
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({
                "error": "INTERNAL_SERVER_ERROR",
                "message": "Failed to read metadata from deepgram.toml"
            })
        );
    }

    #[tokio::test]
    async fn metadata_parse_failure_is_an_error() {
        let file = descriptor("this is = = not toml");
        let (status, body) = get(test_state(file.path().to_path_buf()), "/api/metadata").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "INTERNAL_SERVER_ERROR");
    }

    #[tokio::test]
    async fn cors_allows_configured_frontend_origin() {
        let response = create_router(test_state(PathBuf::from("missing.toml")))
            .oneshot(
                Request::builder()
                    .uri("/api/session")
                    .header(header::ORIGIN, "http://localhost:8080")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("http://localhost:8080")
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .and_then(|v| v.to_str().ok()),
            Some("true")
        );
    }

    #[tokio::test]
    async fn cors_ignores_unknown_origin() {
        let response = create_router(test_state(PathBuf::from("missing.toml")))
            .oneshot(
                Request::builder()
                    .uri("/api/session")
                    .header(header::ORIGIN, "https://evil.example.com")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }
}
