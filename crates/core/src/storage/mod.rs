pub mod conversations;
pub mod memory;

use crate::llm::ProviderId;
use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use conversations::PgConversationStore;
pub use memory::InMemoryConversationStore;

const DEFAULT_TITLE: &str = "New Conversation";
const MAX_TITLE_CHARS: usize = 60;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    pub title: String,
    pub provider: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

impl ConversationMetadata {
    /// Title taken from the opening message, shortened on a char boundary.
    pub fn from_first_message(message: &str, provider: ProviderId) -> Self {
        let trimmed = message.trim();
        let title = if trimmed.is_empty() {
            DEFAULT_TITLE.to_string()
        } else if trimmed.chars().count() > MAX_TITLE_CHARS {
            let cut: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
            format!("{}...", cut.trim_end())
        } else {
            trimmed.to_string()
        };
        Self {
            title,
            provider,
            client_ip: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub provider: Option<ProviderId>,
    pub metadata: serde_json::Value,
}

impl NewMessage {
    pub fn user(content: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            provider: None,
            metadata,
        }
    }

    pub fn assistant(content: impl Into<String>, provider: ProviderId, metadata: serde_json::Value) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            provider: Some(provider),
            metadata,
        }
    }
}

/// Conversation persistence. Writes are scoped to one user; appending to a conversation owned by
/// someone else is an error.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, user_id: &str, metadata: ConversationMetadata) -> anyhow::Result<String>;

    async fn add_message(&self, user_id: &str, conversation_id: &str, message: NewMessage) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_are_shortened_from_the_first_message() {
        let short = ConversationMetadata::from_first_message("  Best travel card?  ", ProviderId::OpenAi);
        assert_eq!(short.title, "Best travel card?");

        let long = ConversationMetadata::from_first_message(&"é".repeat(80), ProviderId::OpenAi);
        assert_eq!(long.title.chars().count(), MAX_TITLE_CHARS + 3);

        assert_eq!(ConversationMetadata::from_first_message("  ", ProviderId::Anthropic).title, DEFAULT_TITLE);
    }
}
