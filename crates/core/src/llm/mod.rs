pub mod anthropic;
pub mod error;
pub mod json;
pub mod openai;
pub mod prompt;
pub mod retry;
pub mod sse;

use crate::domain::request::ProviderRequest;
use crate::llm::error::ProviderError;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
}

pub type ProviderId = Provider;

impl Provider {
    /// Fixed resolution order used when neither the requested nor the default provider is usable.
    pub const ALL: [Provider; 2] = [Provider::OpenAi, Provider::Anthropic];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
        }
    }

    /// Accepts vendor names and the `A`/`B` aliases used by older clients.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "a" => Some(Provider::Anthropic),
            "openai" | "b" => Some(Provider::OpenAi),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeMode {
    /// Incremental delivery for the streaming chat route.
    Stream,
    /// Schema-constrained output where the vendor supports it.
    Json,
}

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Provider output before normalization, tagged by shape.
pub enum RawProviderResult {
    /// Vendor-side schema-validated JSON.
    Structured(serde_json::Value),
    /// A single text blob that needs best-effort extraction.
    Text(String),
    /// Native incremental token stream.
    Stream(TextStream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Structured,
    Text,
    Stream,
}

impl RawProviderResult {
    pub fn shape(&self) -> ResultShape {
        match self {
            RawProviderResult::Structured(_) => ResultShape::Structured,
            RawProviderResult::Text(_) => ResultShape::Text,
            RawProviderResult::Stream(_) => ResultShape::Stream,
        }
    }

    /// Drains a token stream into a single text blob; other shapes pass through.
    pub async fn into_complete(self) -> Result<Self, ProviderError> {
        match self {
            RawProviderResult::Stream(mut stream) => {
                let mut text = String::new();
                while let Some(chunk) = stream.next().await {
                    text.push_str(&chunk?);
                }
                Ok(RawProviderResult::Text(text))
            }
            other => Ok(other),
        }
    }
}

impl fmt::Debug for RawProviderResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawProviderResult::Structured(v) => f.debug_tuple("Structured").field(v).finish(),
            RawProviderResult::Text(t) => f.debug_tuple("Text").field(t).finish(),
            RawProviderResult::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// One LLM vendor behind the uniform invoke contract.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether the credential/config needed to call the vendor is present. Evaluated per call.
    fn is_available(&self) -> bool;

    async fn invoke(
        &self,
        request: &ProviderRequest,
        mode: InvokeMode,
    ) -> Result<RawProviderResult, ProviderError>;
}
