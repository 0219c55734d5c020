use crate::config::{env_non_empty, env_parse, Settings};
use crate::domain::request::ProviderRequest;
use crate::llm::error::{error_body_fields, error_message, FailureKind, ProviderError};
use crate::llm::prompt::{self, FINANCIAL_DOMAINS};
use crate::llm::retry::RetryPolicy;
use crate::llm::sse::{self, SseAction};
use crate::llm::{InvokeMode, LlmClient, Provider, RawProviderResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 4000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MIN_BUMPED_MAX_TOKENS: u32 = 8192;
const WEB_SEARCH_MAX_USES: u32 = 10;

const TOOL_NAME_EMIT_RECOMMENDATIONS: &str = "emit_recommendations";
const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl AnthropicConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.anthropic_api_key.clone(),
            base_url: env_non_empty("ANTHROPIC_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env_non_empty("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: env_parse("ANTHROPIC_MAX_TOKENS", DEFAULT_MAX_TOKENS),
            timeout: Duration::from_secs(env_parse("ANTHROPIC_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)),
            retry: RetryPolicy::from_env(),
        }
    }
}

/// Web search answer used by the `/search` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchAnswer {
    pub summary: String,
    pub tool_used: bool,
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { http, config })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(AnthropicConfig::from_settings(settings))
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::missing_credential(Provider::Anthropic))
    }

    /// Sends one request and classifies a non-2xx answer. The body is left unread on success.
    async fn send(&self, req: &CreateMessageRequest) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.api_key()?;
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(req)
            .send()
            .await
            .map_err(|e| ProviderError::transport(Provider::Anthropic, &e))?;

        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        let kind = classify(status.as_u16(), &body);
        Err(ProviderError::new(Provider::Anthropic, kind, error_message(&body, status.as_u16()))
            .with_status(status.as_u16()))
    }

    async fn create_message(
        &self,
        req: &CreateMessageRequest,
    ) -> Result<CreateMessageResponse, ProviderError> {
        let res = self.send(req).await?;
        let text = res
            .text()
            .await
            .map_err(|e| ProviderError::transport(Provider::Anthropic, &e))?;
        serde_json::from_str::<CreateMessageResponse>(&text).map_err(|e| {
            ProviderError::new(
                Provider::Anthropic,
                FailureKind::Unknown,
                format!("failed to decode Anthropic response: {e}"),
            )
        })
    }

    async fn create_message_with_retry(
        &self,
        req: &CreateMessageRequest,
    ) -> Result<CreateMessageResponse, ProviderError> {
        self.config.retry.run(move || self.create_message(req)).await
    }

    fn tools(allowed_domains: Vec<String>, with_emit: bool) -> Vec<Tool> {
        let mut tools = vec![Tool::WebSearch {
            kind: WEB_SEARCH_TOOL_TYPE,
            name: "web_search",
            max_uses: WEB_SEARCH_MAX_USES,
            allowed_domains,
        }];
        if with_emit {
            tools.push(Tool::Custom {
                name: TOOL_NAME_EMIT_RECOMMENDATIONS,
                description: "Emit the final credit card recommendations as structured JSON",
                input_schema: prompt::recommendation_schema(),
            });
        }
        tools
    }

    fn default_domains() -> Vec<String> {
        FINANCIAL_DOMAINS.iter().map(|d| d.to_string()).collect()
    }

    fn build_request(&self, request: &ProviderRequest, mode: InvokeMode, max_tokens: u32) -> CreateMessageRequest {
        let json_mode = mode == InvokeMode::Json;
        CreateMessageRequest {
            model: self.config.model.clone(),
            max_tokens,
            system: Some(prompt::system_prompt(&request.preferences, Provider::Anthropic)),
            messages: vec![Message {
                role: "user",
                content: request.message.clone(),
            }],
            tools: Some(Self::tools(Self::default_domains(), json_mode)),
            tool_choice: json_mode.then_some(ToolChoice::Auto),
            stream: (mode == InvokeMode::Stream).then_some(true),
        }
    }

    async fn invoke_json(&self, request: &ProviderRequest) -> Result<RawProviderResult, ProviderError> {
        let mut res = self
            .create_message_with_retry(&self.build_request(request, InvokeMode::Json, self.config.max_tokens))
            .await?;

        // If the model hit max_tokens, retry once with a higher ceiling.
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.config.max_tokens.saturating_mul(2).max(MIN_BUMPED_MAX_TOKENS);
            tracing::warn!(
                from = self.config.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            res = self
                .create_message_with_retry(&self.build_request(request, InvokeMode::Json, bumped))
                .await?;
        }

        if let Some(input) = Self::emitted_recommendations(&res) {
            return Ok(RawProviderResult::Structured(input));
        }
        Ok(RawProviderResult::Text(Self::response_text(&res)))
    }

    async fn invoke_stream(&self, request: &ProviderRequest) -> Result<RawProviderResult, ProviderError> {
        let req = self.build_request(request, InvokeMode::Stream, self.config.max_tokens);
        let req = &req;
        let res = self.config.retry.run(move || self.send(req)).await?;
        let body = Box::pin(res.bytes_stream());
        Ok(RawProviderResult::Stream(sse::token_stream(
            Provider::Anthropic,
            body,
            parse_stream_event,
        )))
    }

    /// Runs a web search restricted to `domains` (or the default financial allow-list).
    pub async fn search(&self, query: &str, domains: &[String]) -> Result<SearchAnswer, ProviderError> {
        let allowed = if domains.is_empty() {
            Self::default_domains()
        } else {
            domains.to_vec()
        };
        let req = CreateMessageRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: None,
            messages: vec![Message {
                role: "user",
                content: prompt::search_prompt(query),
            }],
            tools: Some(Self::tools(allowed, false)),
            tool_choice: None,
            stream: None,
        };
        let res = self.create_message_with_retry(&req).await?;
        let tool_used = res
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::ServerToolUse { .. }));
        Ok(SearchAnswer {
            summary: Self::response_text(&res),
            tool_used,
        })
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }

    fn emitted_recommendations(res: &CreateMessageResponse) -> Option<serde_json::Value> {
        res.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input, .. }
                if name == TOOL_NAME_EMIT_RECOMMENDATIONS && input.is_object() =>
            {
                Some(input.clone())
            }
            _ => None,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn invoke(
        &self,
        request: &ProviderRequest,
        mode: InvokeMode,
    ) -> Result<RawProviderResult, ProviderError> {
        self.api_key()?;
        match mode {
            InvokeMode::Json => self.invoke_json(request).await,
            InvokeMode::Stream => self.invoke_stream(request).await,
        }
    }
}

/// Maps an Anthropic error answer to a failure kind. The body's `error.type` wins over status.
pub fn classify(status: u16, body: &str) -> FailureKind {
    let (error_type, _, _) = error_body_fields(body);
    if let Some(kind) = error_type.as_deref().and_then(kind_for_error_type) {
        return kind;
    }
    match status {
        529 | 503 => FailureKind::Overloaded,
        429 => FailureKind::RateLimited,
        401 | 403 => FailureKind::AuthFailure,
        400 | 404 | 413 | 422 => FailureKind::InvalidRequest,
        _ => FailureKind::Unknown,
    }
}

fn kind_for_error_type(error_type: &str) -> Option<FailureKind> {
    match error_type {
        "overloaded_error" => Some(FailureKind::Overloaded),
        "rate_limit_error" => Some(FailureKind::RateLimited),
        "authentication_error" | "permission_error" => Some(FailureKind::AuthFailure),
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            Some(FailureKind::InvalidRequest)
        }
        _ => None,
    }
}

fn parse_stream_event(payload: &str) -> Result<SseAction, ProviderError> {
    let Ok(event) = serde_json::from_str::<serde_json::Value>(payload) else {
        return Ok(SseAction::Skip);
    };
    match event["type"].as_str() {
        Some("content_block_delta") if event["delta"]["type"] == "text_delta" => Ok(SseAction::Token(
            event["delta"]["text"].as_str().unwrap_or_default().to_string(),
        )),
        Some("message_stop") => Ok(SseAction::Stop),
        Some("error") => {
            let kind = event["error"]["type"]
                .as_str()
                .and_then(kind_for_error_type)
                .unwrap_or(FailureKind::Unknown);
            Err(sse::in_band_error(Provider::Anthropic, &event, kind))
        }
        _ => Ok(SseAction::Skip),
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Tool {
    WebSearch {
        #[serde(rename = "type")]
        kind: &'static str,
        name: &'static str,
        max_uses: u32,
        allowed_domains: Vec<String>,
    },
    Custom {
        name: &'static str,
        description: &'static str,
        input_schema: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "auto")]
    Auto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(rename = "server_tool_use")]
    ServerToolUse {},

    #[serde(other)]
    Unknown,
}
