//! API error type and its HTTP mapping.

use axum::{
    Json,
    extract::{FromRequest, multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::store::StoreError;

/// Key used for errors that do not belong to a single field
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Field name → messages, serialized as the 400 response body
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors holding a single message for one field
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// `Ok(())` when nothing was recorded, otherwise a validation error
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("Not found.")]
    NotFound,

    #[error("Method not allowed.")]
    MethodNotAllowed,

    #[error("Request body is too large.")]
    PayloadTooLarge,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::single(field, message))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Validation(errors) => (status, Json(errors)).into_response(),
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (status, Json(json!({ "detail": "Internal server error." }))).into_response()
            }
            other => (status, Json(json!({ "detail": other.to_string() }))).into_response(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::DuplicateEmail => {
                ApiError::validation("email", "user with this email already exists.")
            }
            StoreError::Backend(e) => ApiError::Internal(e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(NON_FIELD_ERRORS, rejection.body_text())
    }
}

/// Body limit rejections keep their 413; anything else is a malformed form
impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        let status = err.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else if status.is_server_error() {
            ApiError::Internal(anyhow::anyhow!("Failed to read multipart body: {}", err.body_text()))
        } else {
            ApiError::validation(NON_FIELD_ERRORS, err.body_text())
        }
    }
}

/// JSON body extractor whose rejections use the API error format
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_errors_group_messages_per_field() {
        let mut errors = FieldErrors::new();
        errors.add("title", "This field is required.");
        errors.add("title", "Ensure this field has no more than 255 characters.");
        errors.add("price", "A valid number is required.");

        let body = serde_json::to_value(&errors).unwrap();
        assert_eq!(body["title"].as_array().unwrap().len(), 2);
        assert_eq!(body["price"][0], "A valid number is required.");
    }

    #[test]
    fn empty_field_errors_are_ok() {
        assert!(FieldErrors::new().into_result().is_ok());
        assert!(matches!(
            FieldErrors::single("name", "blank").into_result(),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn store_errors_map_to_http_statuses() {
        assert_eq!(ApiError::from(StoreError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(StoreError::DuplicateEmail).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(StoreError::Backend(anyhow::anyhow!("boom"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn oversized_bodies_are_413() {
        assert_eq!(ApiError::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
