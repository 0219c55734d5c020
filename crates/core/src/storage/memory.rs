use crate::storage::{ConversationMetadata, ConversationStore, NewMessage};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredConversation {
    user_id: String,
    metadata: ConversationMetadata,
    messages: Vec<NewMessage>,
}

/// Process-local store used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, StoredConversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self, conversation_id: &str) -> Vec<NewMessage> {
        self.conversations
            .lock()
            .await
            .get(conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub async fn metadata(&self, conversation_id: &str) -> Option<ConversationMetadata> {
        self.conversations
            .lock()
            .await
            .get(conversation_id)
            .map(|c| c.metadata.clone())
    }

    pub async fn len(&self) -> usize {
        self.conversations.lock().await.len()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_conversation(&self, user_id: &str, metadata: ConversationMetadata) -> anyhow::Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conversations.lock().await.insert(
            id.clone(),
            StoredConversation {
                user_id: user_id.to_string(),
                metadata,
                messages: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn add_message(&self, user_id: &str, conversation_id: &str, message: NewMessage) -> anyhow::Result<()> {
        let mut guard = self.conversations.lock().await;
        let conversation = guard
            .get_mut(conversation_id)
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| anyhow::anyhow!("conversation {conversation_id} not found or access denied"))?;
        conversation.messages.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderId;
    use crate::storage::MessageRole;
    use serde_json::json;

    #[tokio::test]
    async fn appends_messages_for_the_owner_only() {
        let store = InMemoryConversationStore::new();
        let meta = ConversationMetadata::from_first_message("hello", ProviderId::Anthropic);
        let id = store.create_conversation("user-1", meta.clone()).await.unwrap();

        store
            .add_message("user-1", &id, NewMessage::user("hello", json!({})))
            .await
            .unwrap();
        assert!(store
            .add_message("user-2", &id, NewMessage::user("intrusion", json!({})))
            .await
            .is_err());
        assert!(store
            .add_message("user-1", "missing", NewMessage::user("x", json!({})))
            .await
            .is_err());

        let messages = store.messages(&id).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(store.metadata(&id).await, Some(meta));
    }
}
