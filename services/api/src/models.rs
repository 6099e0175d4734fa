//! API Models
//!
//! Request and response bodies for the REST endpoints, with `utoipa`
//! schemas for the generated OpenAPI document.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `GET /api/session`.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionTokenResponse {
    /// Signed session token, offered back as the `access_token.<token>` subprotocol.
    #[schema(example = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9...")]
    pub token: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ErrorResponse {
    #[schema(example = "INTERNAL_SERVER_ERROR")]
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_response_serializes_code_and_message() {
        let body = ErrorResponse::new("INTERNAL_SERVER_ERROR", "Failed to read metadata");
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({ "error": "INTERNAL_SERVER_ERROR", "message": "Failed to read metadata" })
        );
    }

    #[test]
    fn session_token_response_has_only_token() {
        let body = SessionTokenResponse {
            token: "abc".to_string(),
        };
        assert_eq!(serde_json::to_value(body).unwrap(), json!({ "token": "abc" }));
    }
}
