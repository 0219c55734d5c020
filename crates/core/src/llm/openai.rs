use crate::config::{env_non_empty, env_parse, Settings};
use crate::domain::request::ProviderRequest;
use crate::llm::error::{error_message, FailureKind, ProviderError};
use crate::llm::prompt::{self, SCHEMA_NAME};
use crate::llm::retry::RetryPolicy;
use crate::llm::{InvokeMode, LlmClient, Provider, RawProviderResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4.1";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl OpenAiConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.openai_api_key.clone(),
            base_url: env_non_empty("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env_non_empty("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(env_parse("OPENAI_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)),
            retry: RetryPolicy::from_env(),
        }
    }
}

/// Adapter for the OpenAI Responses API. No native streaming is used; the streaming route
/// receives the whole text and chunks it itself.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { http, config })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(OpenAiConfig::from_settings(settings))
    }

    async fn create_response(&self, req: &CreateResponseRequest) -> Result<CreateResponseBody, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::missing_credential(Provider::OpenAi))?;
        let url = format!("{}/v1/responses", self.config.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(req)
            .send()
            .await
            .map_err(|e| ProviderError::transport(Provider::OpenAi, &e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| ProviderError::transport(Provider::OpenAi, &e))?;
        if !status.is_success() {
            return Err(ProviderError::new(
                Provider::OpenAi,
                classify(status.as_u16()),
                error_message(&text, status.as_u16()),
            )
            .with_status(status.as_u16()));
        }

        serde_json::from_str::<CreateResponseBody>(&text).map_err(|e| {
            ProviderError::new(
                Provider::OpenAi,
                FailureKind::Unknown,
                format!("failed to decode OpenAI response: {e}"),
            )
        })
    }

    fn build_request(&self, request: &ProviderRequest, mode: InvokeMode) -> CreateResponseRequest {
        let text = (mode == InvokeMode::Json).then(|| TextOptions {
            format: TextFormat {
                kind: "json_schema",
                name: SCHEMA_NAME,
                schema: prompt::recommendation_schema(),
                strict: true,
            },
        });
        CreateResponseRequest {
            model: self.config.model.clone(),
            instructions: prompt::system_prompt(&request.preferences, Provider::OpenAi),
            input: request.message.clone(),
            tools: vec![ToolSpec {
                kind: "web_search_preview",
            }],
            text,
        }
    }

    fn output_text(body: &CreateResponseBody) -> String {
        let mut out = String::new();
        for item in &body.output {
            if let OutputItem::Message { content } = item {
                for part in content {
                    if let ContentPart::OutputText { text } = part {
                        out.push_str(text);
                    }
                }
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn invoke(
        &self,
        request: &ProviderRequest,
        mode: InvokeMode,
    ) -> Result<RawProviderResult, ProviderError> {
        let req = self.build_request(request, mode);
        let req = &req;
        let body = self.config.retry.run(move || self.create_response(req)).await?;
        let text = Self::output_text(&body);

        if mode == InvokeMode::Json {
            match serde_json::from_str::<serde_json::Value>(text.trim()) {
                Ok(value) if value.is_object() => return Ok(RawProviderResult::Structured(value)),
                Ok(_) | Err(_) => {
                    tracing::debug!(
                        provider = %Provider::OpenAi,
                        bytes = text.len(),
                        "json mode answer is not a JSON object; handing over as text"
                    );
                }
            }
        }
        Ok(RawProviderResult::Text(text))
    }
}

/// Maps an OpenAI error status to a failure kind. Quota exhaustion (`insufficient_quota`) also
/// arrives as 429 and is treated as rate limiting.
pub fn classify(status: u16) -> FailureKind {
    match status {
        503 => FailureKind::Overloaded,
        429 => FailureKind::RateLimited,
        401 | 403 => FailureKind::AuthFailure,
        400 | 404 | 422 => FailureKind::InvalidRequest,
        _ => FailureKind::Unknown,
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateResponseRequest {
    model: String,
    instructions: String,
    input: String,
    tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextOptions>,
}

#[derive(Debug, Clone, Serialize)]
struct ToolSpec {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct TextOptions {
    format: TextFormat,
}

#[derive(Debug, Clone, Serialize)]
struct TextFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'static str,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateResponseBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum OutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "output_text")]
    OutputText { text: String },

    #[serde(other)]
    Other,
}
