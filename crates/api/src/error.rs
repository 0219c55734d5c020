use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cardwise_core::llm::error::{FailureKind, ProviderError};
use cardwise_core::orchestrator::OrchestratorError;
use serde_json::{json, Value};

/// Every error leaves the API as `{error, status, details?}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    RateLimited,
    Orchestrator(OrchestratorError),
    Provider(ProviderError),
    Internal(anyhow::Error),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::Provider(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

fn attempt(err: &ProviderError) -> Value {
    json!({
        "provider": err.provider,
        "kind": err.kind,
        "message": err.message,
    })
}

fn provider_failure(err: &ProviderError) -> (StatusCode, &'static str) {
    match err.kind {
        FailureKind::Overloaded => (
            StatusCode::SERVICE_UNAVAILABLE,
            "The AI service is temporarily overloaded. Please try again shortly.",
        ),
        FailureKind::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            "The AI service is receiving too many requests. Please try again shortly.",
        ),
        FailureKind::AuthFailure => (
            StatusCode::SERVICE_UNAVAILABLE,
            "The AI service is not configured correctly.",
        ),
        FailureKind::InvalidRequest => (StatusCode::BAD_REQUEST, "The AI service rejected the request."),
        FailureKind::Unknown => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "The AI service failed to process the request.",
        ),
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String, Option<Value>) {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone(), None),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required".to_string(), None),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please wait a minute before trying again.".to_string(),
                None,
            ),
            ApiError::Orchestrator(OrchestratorError::Validation(err)) => {
                (StatusCode::BAD_REQUEST, err.to_string(), None)
            }
            ApiError::Orchestrator(OrchestratorError::NoProviderAvailable) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "No AI provider is available. Please try again later.".to_string(),
                None,
            ),
            ApiError::Orchestrator(OrchestratorError::ProviderFailed(err)) | ApiError::Provider(err) => {
                let (status, message) = provider_failure(err);
                (status, message.to_string(), Some(attempt(err)))
            }
            ApiError::Orchestrator(OrchestratorError::Exhausted { primary, fallback }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "All AI providers are currently unavailable. Please try again later.".to_string(),
                Some(json!({ "attempts": [attempt(primary), attempt(fallback)] })),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(err) = &self {
            sentry_anyhow::capture_anyhow(err);
            tracing::error!(error = %err, "unexpected error");
        }

        let (status, message, details) = self.parts();
        let mut body = json!({
            "error": message,
            "status": status.as_u16(),
        });
        if let Some(details) = details {
            body["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}
