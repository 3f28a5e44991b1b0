use axum::{
    Json,
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{cache::CacheFault, error::ClassifyError};

/// Error returned by a request handler.
#[derive(Debug)]
pub enum ApiError {
    Classify(ClassifyError),
    /// The multipart form could not be read or lacks a required field.
    Form(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// The `{"kind", "detail"}` pair used for both request and batch item errors.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub detail: String,
}

impl ErrorBody {
    /// Kind and message of a pipeline error.
    pub fn from_classify(error: &ClassifyError) -> Self {
        ErrorBody {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

impl ApiError {
    /// HTTP status the error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Classify(error) => match error {
                ClassifyError::InvalidTopK { .. }
                | ClassifyError::EmptyBatch
                | ClassifyError::BatchTooLarge { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                e if e.is_client_error() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Form(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ClassifyError> for ApiError {
    fn from(error: ClassifyError) -> Self {
        ApiError::Classify(error)
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        ApiError::Form(error.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::Form(rejection.body_text())
    }
}

impl From<CacheFault> for ApiError {
    fn from(fault: CacheFault) -> Self {
        ApiError::Internal(fault.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Classify(error) => ErrorBody::from_classify(&error),
            ApiError::Form(detail) => ErrorBody {
                kind: "invalid_form",
                detail,
            },
            ApiError::Internal(detail) => ErrorBody {
                kind: "internal_error",
                detail,
            },
        };
        if status.is_server_error() {
            log::error!("Request failed: {}: {}", body.kind, body.detail);
        }
        (status, Json(ErrorResponse { error: body })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (ClassifyError::InvalidInput(None), StatusCode::BAD_REQUEST),
            (ClassifyError::Decode("bad".into()), StatusCode::BAD_REQUEST),
            (
                ClassifyError::PayloadTooLarge { size: 2, limit: 1 },
                StatusCode::BAD_REQUEST,
            ),
            (
                ClassifyError::InvalidDimensions { width: 0, height: 4 },
                StatusCode::BAD_REQUEST,
            ),
            (
                ClassifyError::InvalidTopK { value: 0, min: 1, max: 10 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ClassifyError::EmptyBatch, StatusCode::UNPROCESSABLE_ENTITY),
            (
                ClassifyError::BatchTooLarge { size: 11, limit: 10 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ClassifyError::Classification("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ClassifyError::EngineUnavailable, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
        assert_eq!(
            ApiError::Form("missing file".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn body_carries_kind_and_detail() {
        let response = ApiError::from(ClassifyError::EmptyBatch).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["kind"], "empty_batch");
        assert_eq!(json["error"]["detail"], "batch must contain at least one file");
    }
}
