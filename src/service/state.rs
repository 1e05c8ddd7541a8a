//! In-memory truth for rendering.
//!
//! Conversations are keyed by a [`ConversationKey`] that never changes, so the
//! placeholder → durable id switch only touches `remote_id`. Everything here
//! is synchronous; the async orchestration lives in `conversation_store`.

use chrono::{DateTime, Utc};

use crate::identity::AuthState;
use crate::models::{
    ChatTurn, Conversation, ConversationRecord, Message, MessageStatus, StoredMessage, User,
    DRAFT_ID_PREFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConversationKey(u64);

#[derive(Debug, Clone)]
pub(crate) struct ConversationEntry {
    pub key: ConversationKey,
    /// `None` while the store has not assigned an id yet.
    pub remote_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl ConversationEntry {
    fn draft_id(&self) -> String {
        format!("{DRAFT_ID_PREFIX}{}", self.key.0)
    }

    pub fn external_id(&self) -> String {
        self.remote_id.clone().unwrap_or_else(|| self.draft_id())
    }

    /// The placeholder id stays a valid alias after the durable id arrives.
    pub fn answers_to(&self, id: &str) -> bool {
        self.remote_id.as_deref() == Some(id) || self.draft_id() == id
    }

    /// Prior turns usable as text-model history.
    pub fn history(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .filter(|m| !m.is_image() && m.status != MessageStatus::Ephemeral)
            .map(ChatTurn::from)
            .collect()
    }

    pub fn view(&self) -> Conversation {
        Conversation {
            id: self.external_id(),
            title: self.title.clone(),
            messages: self.messages.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ActivePointer {
    Key(ConversationKey),
    /// Selected by an id nothing answers to (yet).
    Unknown(String),
}

/// What a send needs to remember about the conversation it targets.
#[derive(Debug, Clone)]
pub(crate) struct StagedSend {
    pub key: ConversationKey,
    pub session: u64,
    pub owner: User,
    pub fresh: bool,
    pub remote_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub auth: AuthState,
    /// Bumped on every identity transition; async work started under an older
    /// value must not touch memory.
    pub session: u64,
    next_key: u64,
    pub conversations: Vec<ConversationEntry>,
    pub active: Option<ActivePointer>,
    pub sending: bool,
    pub fetching: bool,
    pub configuration_missing: bool,
}

impl StoreState {
    fn allocate_key(&mut self) -> ConversationKey {
        self.next_key += 1;
        ConversationKey(self.next_key)
    }

    /// Drops the session's conversations and starts a new epoch. Sends still
    /// draining from the old epoch no longer hold the single-flight flag.
    pub fn reset(&mut self, auth: AuthState) {
        self.auth = auth;
        self.session += 1;
        self.conversations.clear();
        self.active = None;
        self.sending = false;
        self.fetching = false;
    }

    pub fn entry(&self, key: ConversationKey) -> Option<&ConversationEntry> {
        self.conversations.iter().find(|c| c.key == key)
    }

    pub fn entry_mut(&mut self, key: ConversationKey) -> Option<&mut ConversationEntry> {
        self.conversations.iter_mut().find(|c| c.key == key)
    }

    pub fn active_entry(&self) -> Option<&ConversationEntry> {
        match self.active.as_ref()? {
            ActivePointer::Key(key) => self.entry(*key),
            ActivePointer::Unknown(id) => self.conversations.iter().find(|c| c.answers_to(id)),
        }
    }

    pub fn select(&mut self, id: &str) {
        self.active = Some(match self.conversations.iter().find(|c| c.answers_to(id)) {
            Some(entry) => ActivePointer::Key(entry.key),
            None => ActivePointer::Unknown(id.to_string()),
        });
    }

    /// Puts the user message on screen: appended to the active conversation,
    /// or into a new placeholder conversation that becomes active.
    pub fn stage_user_message(&mut self, owner: User, message: Message, title: String) -> StagedSend {
        let session = self.session;
        if let Some(key) = self.active_entry().map(|e| e.key) {
            if let Some(entry) = self.entry_mut(key) {
                let history = entry.history();
                entry.messages.push(message);
                return StagedSend {
                    key,
                    session,
                    owner,
                    fresh: false,
                    remote_id: entry.remote_id.clone(),
                    title: entry.title.clone(),
                    created_at: entry.created_at,
                    history,
                };
            }
        }

        let key = self.allocate_key();
        let created_at = message.timestamp;
        self.conversations.insert(
            0,
            ConversationEntry {
                key,
                remote_id: None,
                title: title.clone(),
                created_at,
                messages: vec![message],
            },
        );
        self.active = Some(ActivePointer::Key(key));
        StagedSend {
            key,
            session,
            owner,
            fresh: true,
            remote_id: None,
            title,
            created_at,
            history: Vec::new(),
        }
    }

    pub fn push_message(&mut self, key: ConversationKey, message: Message) {
        if let Some(entry) = self.entry_mut(key) {
            entry.messages.push(message);
        }
    }

    /// Rewrites one message in place by id.
    pub fn update_message(&mut self, key: ConversationKey, id: &str, update: impl FnOnce(&mut Message)) {
        if let Some(message) = self
            .entry_mut(key)
            .and_then(|entry| entry.messages.iter_mut().find(|m| m.id == id))
        {
            update(message);
        }
    }

    pub fn remove_message(&mut self, key: ConversationKey, id: &str) {
        if let Some(entry) = self.entry_mut(key) {
            entry.messages.retain(|m| m.id != id);
        }
    }

    pub fn remove_conversation(&mut self, key: ConversationKey) {
        self.conversations.retain(|c| c.key != key);
        if matches!(self.active, Some(ActivePointer::Key(k)) if k == key) {
            self.active = None;
        }
    }

    /// Replaces the list wholesale with a freshly loaded one.
    pub fn replace_loaded(&mut self, loaded: Vec<(ConversationRecord, Vec<StoredMessage>)>) {
        let mut entries = Vec::with_capacity(loaded.len());
        for (record, messages) in loaded {
            entries.push(ConversationEntry {
                key: self.allocate_key(),
                remote_id: Some(record.id),
                title: record.title,
                created_at: record.created_at,
                messages: messages.into_iter().map(Message::from).collect(),
            });
        }
        self.conversations = entries;
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let mut conversations: Vec<Conversation> =
            self.conversations.iter().map(ConversationEntry::view).collect();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ChatSnapshot {
            user_id: self.auth.user().map(|u| u.uid.clone()),
            conversations,
            active_conversation_id: self.active_entry().map(ConversationEntry::external_id),
            is_loading: self.sending || self.fetching,
            is_configuration_missing: self.configuration_missing,
        }
    }
}

/// Everything a renderer needs, detached from the live state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    pub user_id: Option<String>,
    /// Newest first.
    pub conversations: Vec<Conversation>,
    pub active_conversation_id: Option<String>,
    pub is_loading: bool,
    pub is_configuration_missing: bool,
}

impl ChatSnapshot {
    pub fn active_conversation(&self) -> Option<&Conversation> {
        let id = self.active_conversation_id.as_deref()?;
        self.conversations.iter().find(|c| c.id == id)
    }
}
