use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest title derived from a first message, in characters.
pub const TITLE_MAX_CHARS: usize = 30;
const TITLE_ELLIPSIS: &str = "...";

/// Case-insensitive prefix routing a send to image generation.
pub const IMAGINE_COMMAND: &str = "/imagine";

/// Signed-in user as resolved by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl User {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into(), display_name: None, email: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Model => "model",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MessageRole {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "model" => Ok(MessageRole::Model),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// Where a message stands relative to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Shown locally, write not confirmed yet.
    Pending,
    /// Model reply still receiving fragments.
    Streaming,
    /// Confirmed by the store.
    Persisted,
    /// Local-only notice (inline errors); never written, never sent as history.
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    fn fresh(role: MessageRole, content: String, image: Option<String>, status: MessageStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            image,
            timestamp: Utc::now(),
            status,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::fresh(MessageRole::User, content.into(), None, MessageStatus::Pending)
    }

    /// First fragment of a streamed reply.
    pub fn streaming(content: impl Into<String>) -> Self {
        Self::fresh(MessageRole::Model, content.into(), None, MessageStatus::Streaming)
    }

    pub fn image(uri: impl Into<String>) -> Self {
        Self::fresh(MessageRole::Model, String::new(), Some(uri.into()), MessageStatus::Pending)
    }

    pub fn error_notice(text: impl Into<String>) -> Self {
        Self::fresh(MessageRole::Model, text.into(), None, MessageStatus::Ephemeral)
    }

    pub fn is_image(&self) -> bool {
        self.image.is_some()
    }

    /// Record sent to the store; the local id is not transmitted.
    pub fn to_new(&self) -> NewMessage {
        NewMessage {
            role: self.role,
            content: self.content.clone(),
            image: self.image.clone(),
            timestamp: self.timestamp,
        }
    }
}

impl From<StoredMessage> for Message {
    fn from(m: StoredMessage) -> Self {
        Self {
            id: m.id,
            role: m.role,
            content: m.content,
            image: m.image,
            timestamp: m.created_at,
            status: MessageStatus::Persisted,
        }
    }
}

/// Read-only view of a conversation handed to renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_draft(&self) -> bool {
        self.id.starts_with(DRAFT_ID_PREFIX)
    }
}

pub(crate) const DRAFT_ID_PREFIX: &str = "draft-";

/// Derives a conversation title from its first message.
pub fn derive_title(content: &str) -> String {
    if content.chars().count() > TITLE_MAX_CHARS {
        let prefix: String = content.chars().take(TITLE_MAX_CHARS).collect();
        format!("{prefix}{TITLE_ELLIPSIS}")
    } else {
        content.to_string()
    }
}

/// Returns the image prompt when `content` is an `/imagine` command.
pub fn imagine_prompt(content: &str) -> Option<&str> {
    let head = content.get(..IMAGINE_COMMAND.len())?;
    if head.eq_ignore_ascii_case(IMAGINE_COMMAND) {
        Some(content[IMAGINE_COMMAND.len()..].trim())
    } else {
        None
    }
}

/// One turn of chat history as the text model sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(m: &Message) -> Self {
        Self { role: m.role, content: m.content.clone() }
    }
}

// ── Store records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub image: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_content_gets_truncated_title() {
        let content = "Create a 7-day workout plan for a beginner.";
        let title = derive_title(content);
        assert_eq!(title, "Create a 7-day workout plan fo...");
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn short_content_keeps_title_untouched() {
        assert_eq!(derive_title("Hello there"), "Hello there");
        let exact = "x".repeat(TITLE_MAX_CHARS);
        assert_eq!(derive_title(&exact), exact);
    }

    #[test]
    fn title_truncation_respects_char_boundaries() {
        let content = "é".repeat(40);
        assert_eq!(derive_title(&content), format!("{}...", "é".repeat(30)));
    }

    #[test]
    fn imagine_prefix_is_case_insensitive_and_trimmed() {
        assert_eq!(imagine_prompt("/imagine a red cube"), Some("a red cube"));
        assert_eq!(imagine_prompt("/IMAGINE   neon city  "), Some("neon city"));
        assert_eq!(imagine_prompt("imagine a red cube"), None);
        assert_eq!(imagine_prompt("/ima"), None);
        assert_eq!(imagine_prompt("é"), None);
    }

    #[test]
    fn outgoing_record_drops_local_id() {
        let msg = Message::user("hi");
        let record = msg.to_new();
        assert_eq!(record.content, "hi");
        assert_eq!(record.role, MessageRole::User);
        assert_eq!(record.timestamp, msg.timestamp);
    }

    #[test]
    fn role_parsing_round_trips_store_strings() {
        assert_eq!(MessageRole::try_from("MODEL".to_string()), Ok(MessageRole::Model));
        assert!(MessageRole::try_from("assistant".to_string()).is_err());
    }
}
