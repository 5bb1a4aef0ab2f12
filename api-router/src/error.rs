use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        // Per-file failures are classified by what went wrong with the file.
        let kind = match &err {
            AppError::FileProcessing { source, .. } => source.as_ref(),
            other => other,
        };
        if kind.is_validation() {
            Self::ValidationError(err.to_string())
        } else if kind.is_not_available() {
            match err {
                AppError::NotFound(msg) | AppError::NoRelevantContext(msg) => Self::NotFound(msg),
                other => Self::NotFound(other.to_string()),
            }
        } else {
            tracing::error!("Internal error: {:?}", err);
            Self::InternalError("Internal server error".to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                status: "error".to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let not_found = AppError::NotFound("No logs found for this job".to_string());
        let api_error = ApiError::from(not_found);
        assert!(matches!(api_error, ApiError::NotFound(msg) if msg == "No logs found for this job"));

        let no_context = AppError::NoRelevantContext("job has no chunks".to_string());
        assert!(matches!(
            ApiError::from(no_context),
            ApiError::NotFound(msg) if msg == "job has no chunks"
        ));

        let validation = AppError::Validation("invalid input".to_string());
        let api_error = ApiError::from(validation);
        assert!(
            matches!(api_error, ApiError::ValidationError(msg) if msg == "Validation error: invalid input")
        );

        assert!(matches!(
            ApiError::from(AppError::EmptyUpload),
            ApiError::ValidationError(_)
        ));
        assert!(matches!(
            ApiError::from(AppError::AggregatedArtifactMissing("job-1".into())),
            ApiError::ValidationError(msg) if msg.contains("job-1")
        ));

        let internal_error = AppError::Io(std::io::Error::other("io error"));
        let api_error = ApiError::from(internal_error);
        assert!(matches!(api_error, ApiError::InternalError(_)));
    }

    #[test]
    fn file_processing_errors_follow_their_cause() {
        let parse = AppError::for_file(
            "broken.pdf",
            AppError::Parse {
                parser: "pdf",
                message: "bad xref".into(),
            },
        );
        assert!(matches!(ApiError::from(parse), ApiError::InternalError(_)));

        let unsupported = AppError::for_file(
            "image.png",
            AppError::UnsupportedType("image/png".into()),
        );
        assert!(matches!(
            ApiError::from(unsupported),
            ApiError::ValidationError(msg) if msg.contains("image.png")
        ));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::NotFound("not found".to_string()),
            StatusCode::NOT_FOUND,
        );
        assert_status_code(
            ApiError::ValidationError("invalid input".to_string()),
            StatusCode::BAD_REQUEST,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        let api_error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
