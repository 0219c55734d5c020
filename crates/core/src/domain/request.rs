use crate::domain::preferences::{self, UserPreferences};
use crate::domain::ValidationError;
use crate::llm::ProviderId;
use serde_json::Value;

pub const MAX_MESSAGE_CHARS: usize = 2000;

/// The normalized unit handed to a provider adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub message: String,
    pub preferences: UserPreferences,
    pub provider: Option<ProviderId>,
    pub conversation_id: Option<String>,
}

impl ProviderRequest {
    /// Validates a raw `/chat` body.
    pub fn from_chat_body(body: &Value) -> Result<Self, ValidationError> {
        let Value::Object(obj) = body else {
            return Err(ValidationError::new("Request body must be a JSON object"));
        };

        let message = match obj.get("message") {
            Some(Value::String(s)) => s.trim(),
            _ => return Err(ValidationError::new("Message is required and must be a string")),
        };
        if message.is_empty() {
            return Err(ValidationError::new("Message is required and must be a string"));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ValidationError::new(format!(
                "Message too long (max {MAX_MESSAGE_CHARS} characters)"
            )));
        }

        let preferences = match obj.get("preferences") {
            None | Some(Value::Null) => UserPreferences::default(),
            Some(raw) => preferences::validate(raw)?,
        };

        let provider = match obj.get("provider") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(ProviderId::parse(s).ok_or_else(|| {
                ValidationError::new("Provider must be either \"anthropic\" or \"openai\"")
            })?),
            Some(_) => {
                return Err(ValidationError::new(
                    "Provider must be either \"anthropic\" or \"openai\"",
                ))
            }
        };

        let conversation_id = match obj.get("conversationId") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(_) => {
                return Err(ValidationError::new(
                    "conversationId must be a non-empty string",
                ))
            }
        };

        Ok(Self {
            message: message.to_string(),
            preferences,
            provider,
            conversation_id,
        })
    }
}
