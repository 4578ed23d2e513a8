/// Success envelope
///
/// Every handler answers `{ "success": true, "data"?: ..., "message"?: ... }`.
/// Errors use the same shape with `success: false` (see [`crate::error`]).
///
/// ```
/// use otpgate_api::response::ApiResponse;
/// use serde_json::json;
///
/// let body = serde_json::to_value(ApiResponse::ok(json!({ "balance": 3 }))).unwrap();
/// assert_eq!(body, json!({ "success": true, "data": { "balance": 3 } }));
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            status: StatusCode::OK,
        }
    }

    /// `201 Created` with data
    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::ok(data)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiResponse<()> {
    /// Message-only response
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            status: StatusCode::OK,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_only() {
        let body = serde_json::to_value(ApiResponse::message("Logged out")).unwrap();
        assert_eq!(body, json!({ "success": true, "message": "Logged out" }));
    }

    #[test]
    fn test_data_with_message() {
        let body =
            serde_json::to_value(ApiResponse::ok(json!([1, 2])).with_message("two items")).unwrap();
        assert_eq!(body["data"], json!([1, 2]));
        assert_eq!(body["message"], "two items");
    }

    #[test]
    fn test_created_status() {
        let response = ApiResponse::created(json!({ "id": 1 })).into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
