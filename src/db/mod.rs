pub mod conversation_repository;
pub mod in_memory;
pub mod message_repository;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::{ConversationRecord, NewConversation, NewMessage, StoredMessage};

use self::conversation_repository::ConversationRepository;
use self::message_repository::MessageRepository;

pub use self::in_memory::InMemoryChatRepository;

/// Durable side log of conversations and their messages.
///
/// Append-only: the conversation store never updates or deletes records.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Conversations owned by `user_id`, newest first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>, AppError>;

    /// Messages of one conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, AppError>;

    /// Returns the durable conversation id.
    async fn create_conversation(&self, conversation: NewConversation) -> Result<String, AppError>;

    /// Returns the durable message id.
    async fn append_message(&self, conversation_id: &str, message: NewMessage) -> Result<String, AppError>;
}

/// Postgres-backed repository.
#[derive(Clone)]
pub struct PgChatRepository {
    conversations: ConversationRepository,
    messages: MessageRepository,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            conversations: ConversationRepository::new(pool.clone()),
            messages: MessageRepository::new(pool),
        }
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>, AppError> {
        self.conversations.find_by_user(user_id).await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, AppError> {
        self.messages.find_by_conversation_id(conversation_id).await
    }

    async fn create_conversation(&self, conversation: NewConversation) -> Result<String, AppError> {
        self.conversations.save(&conversation).await
    }

    async fn append_message(&self, conversation_id: &str, message: NewMessage) -> Result<String, AppError> {
        self.messages.save(conversation_id, &message).await
    }
}
