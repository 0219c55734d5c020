use crate::storage::{ConversationMetadata, ConversationStore, NewMessage};
use anyhow::Context;

#[derive(Debug, Clone)]
pub struct PgConversationStore {
    pool: sqlx::PgPool,
}

impl PgConversationStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationStore for PgConversationStore {
    async fn create_conversation(&self, user_id: &str, metadata: ConversationMetadata) -> anyhow::Result<String> {
        let meta_json = serde_json::to_value(&metadata).context("serialize conversation metadata")?;
        let id: uuid::Uuid = sqlx::query_scalar(
            "INSERT INTO conversations (id, user_id, title, provider, metadata) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(user_id)
        .bind(&metadata.title)
        .bind(metadata.provider.as_str())
        .bind(meta_json)
        .fetch_one(&self.pool)
        .await
        .context("insert conversations failed")?;

        Ok(id.to_string())
    }

    async fn add_message(&self, user_id: &str, conversation_id: &str, message: NewMessage) -> anyhow::Result<()> {
        let conversation_id = uuid::Uuid::parse_str(conversation_id)
            .with_context(|| format!("invalid conversation id: {conversation_id}"))?;

        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        // Ownership check and counter bump in one statement.
        let updated = sqlx::query(
            "UPDATE conversations SET message_count = message_count + 1, updated_at = now() \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("update conversations failed")?;
        anyhow::ensure!(
            updated.rows_affected() == 1,
            "conversation {conversation_id} not found or access denied"
        );

        sqlx::query(
            "INSERT INTO conversation_messages (conversation_id, user_id, role, content, provider, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.provider.map(|p| p.as_str()))
        .bind(&message.metadata)
        .execute(&mut *tx)
        .await
        .context("insert conversation_messages failed")?;

        tx.commit().await.context("commit transaction failed")?;
        Ok(())
    }
}
