#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Notify;

use genlux_chat::agent::{GenerationClient, TextStream};
use genlux_chat::db::{ChatRepository, InMemoryChatRepository};
use genlux_chat::errors::AppError;
use genlux_chat::identity::AuthState;
use genlux_chat::models::{
    ChatTurn, ConversationRecord, NewConversation, NewMessage, StoredMessage, User,
};
use genlux_chat::service::ConversationStore;

// ── Generation ────────────────────────────────────────────────────────────────

pub enum Reply {
    Fragments(Vec<Result<String, AppError>>),
    /// Fails before any fragment is produced.
    OpenError(AppError),
    /// Yields the first fragment, then waits for `release` before the rest.
    Gated { first: String, release: Arc<Notify>, rest: Vec<String> },
}

pub fn fragments(parts: &[&str]) -> Reply {
    Reply::Fragments(parts.iter().map(|p| Ok(p.to_string())).collect())
}

#[derive(Default)]
pub struct ScriptedGenerator {
    missing_key: bool,
    replies: Mutex<VecDeque<Reply>>,
    image: Mutex<Option<Result<String, AppError>>>,
    text_calls: Mutex<Vec<(Vec<ChatTurn>, String)>>,
    image_prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn without_api_key() -> Arc<Self> {
        Arc::new(Self { missing_key: true, ..Self::default() })
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn set_image(&self, result: Result<String, AppError>) {
        *self.image.lock().unwrap() = Some(result);
    }

    pub fn text_calls(&self) -> Vec<(Vec<ChatTurn>, String)> {
        self.text_calls.lock().unwrap().clone()
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.image_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn ensure_configured(&self) -> Result<(), AppError> {
        if self.missing_key {
            Err(AppError::MissingApiKey)
        } else {
            Ok(())
        }
    }

    async fn generate_text_stream(
        &self,
        history: &[ChatTurn],
        new_message: &str,
    ) -> Result<TextStream, AppError> {
        self.text_calls
            .lock()
            .unwrap()
            .push((history.to_vec(), new_message.to_string()));

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| fragments(&["ok"]));

        match reply {
            Reply::Fragments(parts) => Ok(futures_util::stream::iter(parts).boxed()),
            Reply::OpenError(err) => Err(err),
            Reply::Gated { first, release, rest } => Ok(async_stream::stream! {
                yield Ok(first);
                release.notified().await;
                for part in rest {
                    yield Ok(part);
                }
            }
            .boxed()),
        }
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, AppError> {
        self.image_prompts.lock().unwrap().push(prompt.to_string());
        self.image
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok("data:image/jpeg;base64,AAAA".to_string()))
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// In-memory repository with switchable failures and a gate on history loads.
#[derive(Default)]
pub struct ScriptedRepository {
    pub inner: InMemoryChatRepository,
    fail_list: AtomicBool,
    fail_create: AtomicBool,
    append_error: Mutex<Option<AppError>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// The next append fails with `err`.
    pub fn fail_next_append(&self, err: AppError) {
        *self.append_error.lock().unwrap() = Some(err);
    }

    /// History loads block until the returned handle is notified.
    pub fn gate_loads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub async fn conversation_records(&self, user_id: &str) -> Vec<ConversationRecord> {
        self.inner.list_conversations(user_id).await.unwrap()
    }

    pub async fn stored_messages(&self, user_id: &str) -> Vec<StoredMessage> {
        let mut all = Vec::new();
        for record in self.inner.list_conversations(user_id).await.unwrap() {
            all.extend(self.inner.list_messages(&record.id).await.unwrap());
        }
        all
    }
}

#[async_trait]
impl ChatRepository for ScriptedRepository {
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>, AppError> {
        let gate = self.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(AppError::StoreRead { message: "permission denied".to_string() });
        }
        self.inner.list_conversations(user_id).await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, AppError> {
        self.inner.list_messages(conversation_id).await
    }

    async fn create_conversation(&self, conversation: NewConversation) -> Result<String, AppError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::StoreWrite { message: "quota exceeded".to_string() });
        }
        self.inner.create_conversation(conversation).await
    }

    async fn append_message(&self, conversation_id: &str, message: NewMessage) -> Result<String, AppError> {
        let err = self.append_error.lock().unwrap().take();
        if let Some(err) = err {
            return Err(err);
        }
        self.inner.append_message(conversation_id, message).await
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

pub fn store(repo: &Arc<ScriptedRepository>, generator: &Arc<ScriptedGenerator>) -> ConversationStore {
    ConversationStore::new(repo.clone(), generator.clone())
}

/// Signs `uid` in and waits for the history load.
pub async fn sign_in(store: &ConversationStore, uid: &str) {
    let ticket = store
        .set_identity(AuthState::SignedIn(User::new(uid)))
        .expect("new user should trigger a load");
    store.reload(ticket).await;
}
