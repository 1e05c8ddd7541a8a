use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{MessageRole, NewMessage, StoredMessage};

#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, AppError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, image, created_at
             FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(conversation_id, "Failed to fetch messages: {e}");
            AppError::db_read(
                format!("Failed to fetch messages for conversation {conversation_id}"),
                e,
            )
        })?;

        rows.into_iter()
            .map(|row: sqlx::postgres::PgRow| {
                use sqlx::Row;
                let role_str: String = row.try_get("role")
                    .map_err(|e| AppError::db_read("Failed to read role", e))?;
                let role = MessageRole::try_from(role_str)
                    .map_err(|e| AppError::StoreRead { message: format!("Unknown message role: {e}") })?;
                Ok(StoredMessage {
                    id: row.try_get("id")
                        .map_err(|e| AppError::db_read("Failed to read id", e))?,
                    conversation_id: row.try_get("conversation_id")
                        .map_err(|e| AppError::db_read("Failed to read conversation_id", e))?,
                    role,
                    content: row.try_get("content")
                        .map_err(|e| AppError::db_read("Failed to read content", e))?,
                    image: row.try_get("image")
                        .map_err(|e| AppError::db_read("Failed to read image", e))?,
                    created_at: row.try_get("created_at")
                        .map_err(|e| AppError::db_read("Failed to read created_at", e))?,
                })
            })
            .collect()
    }

    /// Appends under `conversation_id` and returns the store-assigned id.
    pub async fn save(&self, conversation_id: &str, message: &NewMessage) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, image, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.image)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(conversation_id, "Failed to save message: {e}");
            AppError::db_write("Failed to save message", e)
        })?;
        Ok(id)
    }
}
