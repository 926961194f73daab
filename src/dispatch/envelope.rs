//! The JSON error envelope every user-visible failure is rendered into.

use crate::pipeline::{RequestContext, Response, json_response};
use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

/// `{"error", "message", "status_code", "timestamp", "path", ...details}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub status_code: u16,
    pub timestamp: String,
    pub path: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ErrorEnvelope {
    pub fn new(
        ctx: &RequestContext,
        status: StatusCode,
        error: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status_code: status.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: ctx.path.clone(),
            details: Map::new(),
        }
    }

    /// Adds a kind-specific field. Reserved envelope keys are not overwritten.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !matches!(key, "error" | "message" | "status_code" | "timestamp" | "path") {
            self.details.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn into_response(self) -> Response {
        json_response(self.status(), &self)
    }
}

/// The response used when a handler itself fails.
pub fn bare_internal_error() -> Response {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &serde_json::json!({
            "error": "Internal server error",
            "message": "An unexpected error occurred",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_envelope_shape() {
        let request = http::Request::builder()
            .uri("/api/users/7?x=1")
            .body(Bytes::new())
            .unwrap();
        let ctx = RequestContext::new(&request, None);

        let response = ErrorEnvelope::new(&ctx, StatusCode::NOT_FOUND, "NOT_FOUND", "User not found")
            .with("resource", "user")
            .with("path", "/spoofed")
            .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "NOT_FOUND");
        assert_eq!(body["message"], "User not found");
        assert_eq!(body["status_code"], 404);
        assert_eq!(body["path"], "/api/users/7");
        assert_eq!(body["resource"], "user");
        assert!(body["timestamp"].as_str().is_some());
    }
}
