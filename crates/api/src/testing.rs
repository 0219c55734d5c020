use crate::app::AppState;
use crate::auth::TrustedHeaderAuth;
use cardwise_core::domain::request::ProviderRequest;
use cardwise_core::llm::anthropic::SearchAnswer;
use cardwise_core::llm::error::{FailureKind, ProviderError};
use cardwise_core::llm::{InvokeMode, LlmClient, Provider, RawProviderResult};
use cardwise_core::orchestrator::Orchestrator;
use cardwise_core::ratelimit::FixedWindowRateLimiter;
use cardwise_core::search::{SearchService, WebSearch};
use cardwise_core::selector::ProviderSelector;
use cardwise_core::storage::InMemoryConversationStore;
use cardwise_core::streaming::StreamingBridge;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy)]
pub enum Behavior {
    Structured,
    Text(&'static str),
    Fail(FailureKind),
    Unavailable,
}

pub struct FakeProvider {
    id: Provider,
    behavior: Behavior,
}

#[async_trait::async_trait]
impl LlmClient for FakeProvider {
    fn provider(&self) -> Provider {
        self.id
    }

    fn is_available(&self) -> bool {
        !matches!(self.behavior, Behavior::Unavailable)
    }

    async fn invoke(&self, _: &ProviderRequest, _: InvokeMode) -> Result<RawProviderResult, ProviderError> {
        match self.behavior {
            Behavior::Structured => Ok(RawProviderResult::Structured(json!({
                "summary": "One strong match.",
                "recommendedCards": [{"cardName": "Capital One Venture Rewards", "issuer": "Capital One"}]
            }))),
            Behavior::Text(text) => Ok(RawProviderResult::Text(text.to_string())),
            Behavior::Fail(kind) => Err(ProviderError::new(self.id, kind, format!("{} failed", self.id))),
            Behavior::Unavailable => Err(ProviderError::missing_credential(self.id)),
        }
    }
}

pub struct FakeSearch;

#[async_trait::async_trait]
impl WebSearch for FakeSearch {
    async fn search(&self, query: &str, _: &[String]) -> Result<SearchAnswer, ProviderError> {
        if query == "overloaded" {
            return Err(ProviderError::new(Provider::Anthropic, FailureKind::Overloaded, "busy"));
        }
        Ok(SearchAnswer {
            summary: format!("results for {query}"),
            tool_used: true,
        })
    }
}

/// Anthropic is the default provider; chat allows 3 requests per client, search 2.
pub fn test_state(anthropic: Behavior, openai: Behavior, require_auth: bool) -> AppState {
    let clients: Vec<Arc<dyn LlmClient>> = vec![
        Arc::new(FakeProvider {
            id: Provider::Anthropic,
            behavior: anthropic,
        }),
        Arc::new(FakeProvider {
            id: Provider::OpenAi,
            behavior: openai,
        }),
    ];
    let selector = ProviderSelector::new(clients, Some(Provider::Anthropic));
    let orchestrator = Orchestrator::new(
        selector,
        Some(Arc::new(InMemoryConversationStore::new())),
        StreamingBridge::new(8, Duration::ZERO),
    );

    AppState {
        orchestrator: Arc::new(orchestrator),
        search: SearchService::new(Arc::new(FakeSearch), Duration::from_secs(60)),
        auth: Arc::new(TrustedHeaderAuth::new("x-user-id")),
        require_auth,
        chat_limiter: Arc::new(FixedWindowRateLimiter::new(3, Duration::from_secs(60))),
        search_limiter: Arc::new(FixedWindowRateLimiter::new(2, Duration::from_secs(60))),
    }
}
