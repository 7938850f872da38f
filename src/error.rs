use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Failures raised by the vision client itself.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("image processing failed: {0}")]
    ImageProcessingFailed(String),

    #[error("invalid vision endpoint: {0}")]
    InvalidUrl(String),

    #[error("vision API key is not configured")]
    ApiKeyMissing,

    #[error("rate limited by the vision provider")]
    RateLimited,

    #[error("vision provider returned status {0}")]
    ApiError(u16),

    #[error("network error reaching the vision provider: {0}")]
    NetworkError(String),

    #[error("vision response contained no content")]
    EmptyResponse,

    #[error("could not parse vision response: {0}")]
    ParsingFailed(String),

    #[error("analysis cancelled")]
    Cancelled,
}

/// Everything the analyze endpoint can fail with. Vision errors pass
/// through untouched; the orchestrator only adds the quota rejection
/// and store failures of its own.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("weekly scan quota exhausted")]
    QuotaExceeded,

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error("entitlement store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// HTTP-facing failure: status plus a human-readable message and,
/// where it makes sense, a recovery suggestion.
#[derive(Debug)]
pub struct ApiFailure {
    pub status: StatusCode,
    pub error: String,
    pub suggestion: Option<String>,
}

#[derive(Serialize)]
struct FailureBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

impl ApiFailure {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: msg.into(),
            suggestion: None,
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let body = FailureBody {
            error: &self.error,
            suggestion: self.suggestion.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AnalysisError> for ApiFailure {
    fn from(err: AnalysisError) -> Self {
        use VisionError::*;
        let (status, error, suggestion) = match &err {
            AnalysisError::QuotaExceeded => (
                StatusCode::PAYMENT_REQUIRED,
                "weekly scan quota exhausted".to_string(),
                Some("upgrade for unlimited scans".to_string()),
            ),
            AnalysisError::Vision(ApiKeyMissing) | AnalysisError::Vision(InvalidUrl(_)) => {
                error!(error = %err, "vision client misconfigured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "analysis service is misconfigured".to_string(),
                    None,
                )
            }
            AnalysisError::Vision(RateLimited) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "the analysis service is busy".to_string(),
                Some("wait a moment and retry".to_string()),
            ),
            AnalysisError::Vision(NetworkError(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "could not reach the analysis service".to_string(),
                Some("check your connection and retry".to_string()),
            ),
            AnalysisError::Vision(ApiError(code)) => (
                StatusCode::BAD_GATEWAY,
                format!("the analysis service failed (status {code})"),
                Some("wait and retry later".to_string()),
            ),
            AnalysisError::Vision(ImageProcessingFailed(_))
            | AnalysisError::Vision(EmptyResponse)
            | AnalysisError::Vision(ParsingFailed(_)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "analysis failed".to_string(),
                Some("try a clearer photo".to_string()),
            ),
            AnalysisError::Vision(Cancelled) => (
                StatusCode::REQUEST_TIMEOUT,
                "analysis cancelled".to_string(),
                None,
            ),
            AnalysisError::Store(e) => {
                error!(error = %e, "entitlement store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                    None,
                )
            }
        };
        Self {
            status,
            error,
            suggestion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AnalysisError) -> StatusCode {
        ApiFailure::from(err).status
    }

    #[test]
    fn quota_maps_to_payment_required() {
        let failure = ApiFailure::from(AnalysisError::QuotaExceeded);
        assert_eq!(failure.status, StatusCode::PAYMENT_REQUIRED);
        assert!(failure.suggestion.unwrap().contains("upgrade"));
    }

    #[test]
    fn transport_errors_map_to_unavailable() {
        assert_eq!(
            status_of(AnalysisError::Vision(VisionError::RateLimited)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AnalysisError::Vision(VisionError::NetworkError("reset".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AnalysisError::Vision(VisionError::ApiError(502))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn content_errors_map_to_unprocessable() {
        let failure = ApiFailure::from(AnalysisError::Vision(VisionError::ParsingFailed(
            "bad json".into(),
        )));
        assert_eq!(failure.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(failure.suggestion.as_deref(), Some("try a clearer photo"));
    }

    #[test]
    fn config_errors_map_to_internal() {
        assert_eq!(
            status_of(AnalysisError::Vision(VisionError::ApiKeyMissing)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
