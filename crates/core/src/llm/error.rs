use crate::llm::Provider;
use serde::Serialize;
use std::fmt;

/// Closed set of provider failure classes. Upstream logic switches on this tag only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Vendor temporarily over capacity.
    Overloaded,
    /// Caller exceeded the vendor quota.
    RateLimited,
    InvalidRequest,
    /// Missing or rejected credential.
    AuthFailure,
    Unknown,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Overloaded | FailureKind::RateLimited)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Overloaded => "overloaded",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::AuthFailure => "auth_failure",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: Provider,
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: Provider, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn missing_credential(provider: Provider) -> Self {
        Self::new(
            provider,
            FailureKind::AuthFailure,
            format!("{provider} credential is not configured"),
        )
    }

    /// Connection, timeout, and body-read failures.
    pub fn transport(provider: Provider, err: &reqwest::Error) -> Self {
        Self::new(provider, FailureKind::Unknown, format!("transport error: {err}"))
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "LLM error (provider={}, kind={}, status={status}): {}",
                self.provider, self.kind, self.message
            ),
            None => write!(
                f,
                "LLM error (provider={}, kind={}): {}",
                self.provider, self.kind, self.message
            ),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Pulls `error.type`, `error.code` and `error.message` out of a vendor error body.
pub(crate) fn error_body_fields(body: &str) -> (Option<String>, Option<String>, Option<String>) {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None, None);
    };
    let err = &v["error"];
    let get = |key: &str| err[key].as_str().map(str::to_string);
    (get("type"), get("code"), get("message"))
}

pub(crate) fn error_message(body: &str, fallback_status: u16) -> String {
    let (_, _, message) = error_body_fields(body);
    message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {fallback_status}")
            } else {
                trimmed.chars().take(500).collect()
            }
        })
}
