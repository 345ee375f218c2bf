use crate::engine::DispatchError;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use facematch_core::{EngineError, SimilarityError};
use thiserror::Error;

/// Request-level failure, rendered as `{ "message": ... }`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    /// Malformed or oversized multipart body.
    #[error("invalid multipart upload: {message}")]
    InvalidUpload { status: StatusCode, message: String },
    #[error("No faces detected in one or both images")]
    NoFaceDetected,
    /// Decoding, inference or rendering failed; the detail is only logged.
    #[error("{message}")]
    Processing {
        message: &'static str,
        detail: String,
    },
    #[error("{0} is not available on this server")]
    Unsupported(&'static str),
    #[error("face engine unavailable")]
    EngineUnavailable,
    #[error("face engine timed out")]
    Timeout,
}

impl ApiError {
    pub fn processing(detail: impl std::fmt::Display) -> Self {
        ApiError::Processing {
            message: "Error processing image",
            detail: detail.to_string(),
        }
    }

    /// Same as [`processing`](Self::processing), for multi-image requests.
    pub fn processing_many(detail: impl std::fmt::Display) -> Self {
        ApiError::Processing {
            message: "Error processing images",
            detail: detail.to_string(),
        }
    }

    /// Reword a processing failure for a multi-image request.
    pub fn plural(self) -> Self {
        match self {
            ApiError::Processing { detail, .. } => ApiError::processing_many(detail),
            other => other,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidUpload { status, .. } => *status,
            ApiError::BadRequest(_) | ApiError::NoFaceDetected => StatusCode::BAD_REQUEST,
            ApiError::Processing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Engine(EngineError::Unsupported(what)) => ApiError::Unsupported(what),
            DispatchError::Engine(other) => ApiError::processing(other),
            DispatchError::ChannelClosed => ApiError::EngineUnavailable,
            DispatchError::Timeout(_) => ApiError::Timeout,
        }
    }
}

impl From<SimilarityError> for ApiError {
    fn from(e: SimilarityError) -> Self {
        match e {
            SimilarityError::NoFaceDetected => ApiError::NoFaceDetected,
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::InvalidUpload {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Processing { message, detail } => {
                tracing::error!(error = %detail, "{message}");
            }
            other if status.is_server_error() => tracing::error!(error = %other, "request failed"),
            other => tracing::info!(error = %other, "request rejected"),
        }

        (status, Json(serde_json::json!({ "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::NoFaceDetected.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::processing("boom").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::from(DispatchError::Timeout(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(DispatchError::ChannelClosed).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_engine_errors_hide_detail() {
        let err = ApiError::from(DispatchError::Engine(EngineError::InferenceFailed(
            "tensor shape".into(),
        )));
        assert_eq!(err.to_string(), "Error processing image");
    }

    #[test]
    fn test_plural_rewords_processing_only() {
        let err = ApiError::from(DispatchError::Engine(EngineError::InferenceFailed("x".into()))).plural();
        assert_eq!(err.to_string(), "Error processing images");
        assert!(matches!(
            ApiError::NoFaceDetected.plural(),
            ApiError::NoFaceDetected
        ));
    }

    #[test]
    fn test_upload_errors_keep_their_status() {
        let err = ApiError::InvalidUpload {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "length limit exceeded".into(),
        };
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_unsupported_maps_to_not_implemented() {
        let err = ApiError::from(DispatchError::Engine(EngineError::Unsupported(
            "expression classification",
        )));
        assert_eq!(err.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
