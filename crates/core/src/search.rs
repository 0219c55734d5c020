use crate::domain::ValidationError;
use crate::llm::anthropic::{AnthropicClient, SearchAnswer};
use crate::llm::error::ProviderError;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_QUERY_CHARS: usize = 500;
const MAX_CACHED_QUERIES: u64 = 1_000;

#[async_trait::async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, domains: &[String]) -> Result<SearchAnswer, ProviderError>;
}

#[async_trait::async_trait]
impl WebSearch for AnthropicClient {
    async fn search(&self, query: &str, domains: &[String]) -> Result<SearchAnswer, ProviderError> {
        AnthropicClient::search(self, query, domains).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub domains: Vec<String>,
}

impl SearchQuery {
    /// Validates a raw `/search` body.
    pub fn from_body(body: &Value) -> Result<Self, ValidationError> {
        let query = match body.get("query") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return Err(ValidationError::new("Query is required and must be a string")),
        };
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(ValidationError::new(format!(
                "Query must be at most {MAX_QUERY_CHARS} characters"
            )));
        }

        let domains = match body.get("domains") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let Some(domain) = item.as_str() else {
                        return Err(ValidationError::new("Domains must be an array of strings"));
                    };
                    let domain = domain.trim().to_ascii_lowercase();
                    if !domain.is_empty() && !out.contains(&domain) {
                        out.push(domain);
                    }
                }
                out
            }
            Some(_) => return Err(ValidationError::new("Domains must be an array of strings")),
        };

        Ok(Self { query, domains })
    }

    fn cache_key(&self) -> String {
        format!("{}|{}", self.query.to_lowercase(), self.domains.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub summary: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub tool_used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub results: SearchResults,
    pub cached: bool,
}

/// Web search with a short-lived result cache keyed by query and domain list.
#[derive(Clone)]
pub struct SearchService {
    backend: Arc<dyn WebSearch>,
    cache: Cache<String, SearchResults>,
}

impl SearchService {
    pub fn new(backend: Arc<dyn WebSearch>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(MAX_CACHED_QUERIES)
            .build();
        Self { backend, cache }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchOutcome, ProviderError> {
        let key = query.cache_key();
        if let Some(results) = self.cache.get(&key).await {
            tracing::debug!(query = %query.query, "search cache hit");
            return Ok(SearchOutcome {
                results,
                cached: true,
            });
        }

        let answer = self.backend.search(&query.query, &query.domains).await?;
        let results = SearchResults {
            summary: answer.summary,
            query: query.query.clone(),
            timestamp: Utc::now(),
            tool_used: answer.tool_used,
        };
        self.cache.insert(key, results.clone()).await;
        Ok(SearchOutcome {
            results,
            cached: false,
        })
    }
}
