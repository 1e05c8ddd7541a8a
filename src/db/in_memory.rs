use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use super::ChatRepository;
use crate::errors::AppError;
use crate::models::{ConversationRecord, NewConversation, NewMessage, StoredMessage};

#[derive(Default)]
struct Tables {
    conversations: Vec<ConversationRecord>,
    messages: HashMap<String, Vec<StoredMessage>>,
}

/// Process-local repository, used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct InMemoryChatRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|e| AppError::Unexpected(format!("Failed to lock chat tables: {e}")))
    }
}

#[async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>, AppError> {
        let tables = self.lock()?;
        let mut owned: Vec<ConversationRecord> = tables
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, AppError> {
        let tables = self.lock()?;
        let mut messages = tables.messages.get(conversation_id).cloned().unwrap_or_default();
        // Stable sort keeps insertion order for equal timestamps.
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn create_conversation(&self, conversation: NewConversation) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        let mut tables = self.lock()?;
        tables.conversations.push(ConversationRecord {
            id: id.clone(),
            user_id: conversation.user_id,
            title: conversation.title,
            created_at: conversation.created_at,
        });
        Ok(id)
    }

    async fn append_message(&self, conversation_id: &str, message: NewMessage) -> Result<String, AppError> {
        let mut tables = self.lock()?;
        if !tables.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(AppError::StoreWrite {
                message: format!("Conversation '{conversation_id}' does not exist"),
            });
        }
        let id = Uuid::new_v4().to_string();
        tables
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(StoredMessage {
                id: id.clone(),
                conversation_id: conversation_id.to_string(),
                role: message.role,
                content: message.content,
                image: message.image,
                created_at: message.timestamp,
            });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;
    use chrono::{Duration, Utc};

    fn new_conversation(user: &str, title: &str, offset_secs: i64) -> NewConversation {
        NewConversation {
            user_id: user.to_string(),
            title: title.to_string(),
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn conversations_are_scoped_to_owner_and_newest_first() {
        let repo = InMemoryChatRepository::new();
        repo.create_conversation(new_conversation("alice", "old", -10)).await.unwrap();
        repo.create_conversation(new_conversation("alice", "new", 0)).await.unwrap();
        repo.create_conversation(new_conversation("bob", "other", 5)).await.unwrap();

        let titles: Vec<String> = repo
            .list_conversations("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn messages_keep_append_order() {
        let repo = InMemoryChatRepository::new();
        let id = repo.create_conversation(new_conversation("alice", "t", 0)).await.unwrap();
        let at = Utc::now();
        for text in ["first", "second"] {
            let message = NewMessage {
                role: MessageRole::User,
                content: text.to_string(),
                image: None,
                timestamp: at,
            };
            repo.append_message(&id, message).await.unwrap();
        }

        let contents: Vec<String> = repo
            .list_messages(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_is_a_write_error() {
        let repo = InMemoryChatRepository::new();
        let message = NewMessage {
            role: MessageRole::User,
            content: "x".to_string(),
            image: None,
            timestamp: Utc::now(),
        };
        let err = repo.append_message("missing", message).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::StoreWrite);
    }
}
