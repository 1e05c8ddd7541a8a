use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ConversationRecord, NewConversation};

#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_user(&self, user_id: &str) -> Result<Vec<ConversationRecord>, AppError> {
        sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, user_id, title, created_at
             FROM conversations
             WHERE user_id = $1
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(user_id, "Failed to fetch conversations: {e}");
            AppError::db_read(format!("Failed to fetch conversations for {user_id}"), e)
        })
    }

    /// Inserts the conversation and returns its durable id.
    pub async fn save(&self, conversation: &NewConversation) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(user_id = %conversation.user_id, "Failed to save conversation: {e}");
            AppError::db_write("Failed to save conversation", e)
        })?;
        Ok(id)
    }
}
