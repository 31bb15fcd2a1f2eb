use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use crate::error::{Error, ErrorCategory};

/// Crate error as seen by HTTP callers: `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.category() {
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::BadRequest | ErrorCategory::Conflict => StatusCode::BAD_REQUEST,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
