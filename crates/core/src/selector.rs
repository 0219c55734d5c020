use crate::llm::{LlmClient, ProviderId};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoProviderAvailable;

impl fmt::Display for NoProviderAvailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("No AI provider is available")
    }
}

impl std::error::Error for NoProviderAvailable {}

/// Picks which adapter serves a request. Availability is asked of the adapters on every call.
#[derive(Clone)]
pub struct ProviderSelector {
    clients: Vec<Arc<dyn LlmClient>>,
    default_provider: Option<ProviderId>,
}

impl ProviderSelector {
    pub fn new(clients: Vec<Arc<dyn LlmClient>>, default_provider: Option<ProviderId>) -> Self {
        Self {
            clients,
            default_provider,
        }
    }

    pub fn default_provider(&self) -> Option<ProviderId> {
        self.default_provider
    }

    pub fn client(&self, id: ProviderId) -> Option<Arc<dyn LlmClient>> {
        self.clients.iter().find(|c| c.provider() == id).cloned()
    }

    pub fn is_available(&self, id: ProviderId) -> bool {
        self.clients
            .iter()
            .any(|c| c.provider() == id && c.is_available())
    }

    /// Available providers in the fixed resolution order.
    pub fn list_available(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|id| self.is_available(*id))
            .collect()
    }

    /// requested-and-available, then configured default, then first available in fixed order.
    pub fn select(&self, requested: Option<ProviderId>) -> Result<ProviderId, NoProviderAvailable> {
        if let Some(id) = requested {
            if self.is_available(id) {
                return Ok(id);
            }
            tracing::debug!(requested = %id, "requested provider unavailable");
        }
        if let Some(id) = self.default_provider.filter(|id| self.is_available(*id)) {
            return Ok(id);
        }
        self.list_available()
            .into_iter()
            .next()
            .ok_or(NoProviderAvailable)
    }

    /// The other available provider, if any.
    pub fn alternate(&self, primary: ProviderId) -> Option<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .find(|id| *id != primary && self.is_available(*id))
    }
}

impl fmt::Debug for ProviderSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<ProviderId> = self.clients.iter().map(|c| c.provider()).collect();
        f.debug_struct("ProviderSelector")
            .field("providers", &providers)
            .field("default_provider", &self.default_provider)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::ProviderRequest;
    use crate::llm::error::ProviderError;
    use crate::llm::{InvokeMode, RawProviderResult};

    struct Stub {
        id: ProviderId,
        available: bool,
    }

    #[async_trait::async_trait]
    impl LlmClient for Stub {
        fn provider(&self) -> ProviderId {
            self.id
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn invoke(&self, _: &ProviderRequest, _: InvokeMode) -> Result<RawProviderResult, ProviderError> {
            Ok(RawProviderResult::Text(String::new()))
        }
    }

    fn selector(anthropic: bool, openai: bool, default: Option<ProviderId>) -> ProviderSelector {
        ProviderSelector::new(
            vec![
                Arc::new(Stub { id: ProviderId::Anthropic, available: anthropic }),
                Arc::new(Stub { id: ProviderId::OpenAi, available: openai }),
            ],
            default,
        )
    }

    #[test]
    fn requested_wins_when_available() {
        let s = selector(true, true, Some(ProviderId::Anthropic));
        assert_eq!(s.select(Some(ProviderId::OpenAi)), Ok(ProviderId::OpenAi));
    }

    #[test]
    fn falls_back_to_default_then_fixed_order() {
        let s = selector(true, true, Some(ProviderId::Anthropic));
        assert_eq!(s.select(None), Ok(ProviderId::Anthropic));

        let s = selector(true, true, None);
        assert_eq!(s.select(None), Ok(ProviderId::OpenAi));
    }

    #[test]
    fn missing_credential_selects_the_other_provider() {
        let s = selector(false, true, Some(ProviderId::Anthropic));
        assert_eq!(s.select(Some(ProviderId::Anthropic)), Ok(ProviderId::OpenAi));
        assert_eq!(s.list_available(), vec![ProviderId::OpenAi]);
        assert_eq!(s.alternate(ProviderId::OpenAi), None);
    }

    #[test]
    fn nothing_available_is_an_error() {
        let s = selector(false, false, Some(ProviderId::Anthropic));
        assert_eq!(s.select(None), Err(NoProviderAvailable));
        assert!(s.list_available().is_empty());
    }
}
