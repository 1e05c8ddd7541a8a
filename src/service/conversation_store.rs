use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{ChatSnapshot, StagedSend, StoreState};
use crate::agent::GenerationClient;
use crate::db::ChatRepository;
use crate::errors::{AppError, ErrorKind};
use crate::identity::{AuthState, IdentityProvider};
use crate::models::{
    derive_title, imagine_prompt, Conversation, ConversationRecord, Message, MessageStatus,
    NewConversation, StoredMessage, User,
};

pub const MAX_MESSAGE_LENGTH: usize = 8000;

/// Result of a [`ConversationStore::send_message`] call. Errors never escape
/// the send; they end up here and in the visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nobody signed in, or nothing to send.
    Skipped,
    /// Another send or a history load is still running.
    Busy,
    Delivered,
    Failed(ErrorKind),
}

/// Proof that a history load was requested for a given session.
#[derive(Debug)]
pub struct ReloadTicket {
    user: User,
    session: u64,
}

/// Change feed for renderers.
pub struct StoreUpdates {
    rx: watch::Receiver<StoreState>,
}

impl StoreUpdates {
    /// Waits for the next state change; `false` once the store is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn snapshot(&mut self) -> ChatSnapshot {
        self.rx.borrow_and_update().snapshot()
    }
}

struct Inner {
    state: watch::Sender<StoreState>,
    repository: Arc<dyn ChatRepository>,
    generator: Arc<dyn GenerationClient>,
}

/// Progress of one send, used to decide what a failure may roll back.
struct Exchange {
    staged: StagedSend,
    user_message: Message,
    user_confirmed: bool,
    /// Model reply shown locally but not confirmed by the store.
    reply: Option<Message>,
}

/// Clears the single-flight flag however the send ends, unless the session
/// it was taken in is already over.
struct SendGuard<'a> {
    state: &'a watch::Sender<StoreState>,
    session: u64,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        let session = self.session;
        self.state.send_if_modified(|s| {
            if s.session != session || !s.sending {
                return false;
            }
            s.sending = false;
            true
        });
    }
}

/// Owns the conversation list and the active pointer for the signed-in user.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<Inner>,
}

impl ConversationStore {
    pub fn new(repository: Arc<dyn ChatRepository>, generator: Arc<dyn GenerationClient>) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self { inner: Arc::new(Inner { state, repository, generator }) }
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.state.borrow().snapshot()
    }

    pub fn subscribe(&self) -> StoreUpdates {
        StoreUpdates { rx: self.inner.state.subscribe() }
    }

    /// Newest first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.snapshot().conversations
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.inner.state.borrow().active_entry().map(|entry| entry.view())
    }

    pub fn is_loading(&self) -> bool {
        let state = self.inner.state.borrow();
        state.sending || state.fetching
    }

    pub fn is_configuration_missing(&self) -> bool {
        self.inner.state.borrow().configuration_missing
    }

    // ── Selection ───────────────────────────────────────────────────────────

    pub fn select_conversation(&self, id: &str) {
        self.inner.state.send_modify(|s| s.select(id));
    }

    pub fn start_new_chat(&self) {
        self.inner.state.send_modify(|s| s.active = None);
    }

    pub fn acknowledge_configuration_error(&self) {
        self.inner.state.send_if_modified(|s| std::mem::take(&mut s.configuration_missing));
    }

    // ── Identity ────────────────────────────────────────────────────────────

    /// Applies an auth transition synchronously. A newly signed-in user gets
    /// an empty list and a ticket for [`ConversationStore::reload`].
    pub fn set_identity(&self, auth: AuthState) -> Option<ReloadTicket> {
        let mut ticket = None;
        self.inner.state.send_if_modified(|s| {
            let same_user = matches!(
                (s.auth.user(), auth.user()),
                (Some(current), Some(next)) if current.uid == next.uid
            );
            if same_user {
                s.auth = auth;
                return false;
            }
            if s.auth == auth {
                return false;
            }

            let user = auth.user().cloned();
            s.reset(auth);
            if let Some(user) = user {
                info!(user_id = %user.uid, "Identity resolved, loading conversations");
                s.fetching = true;
                ticket = Some(ReloadTicket { user, session: s.session });
            } else {
                info!("Identity cleared, dropping conversations");
            }
            true
        });
        ticket
    }

    /// Fetches the user's full history and replaces the in-memory list.
    /// Discarded if the identity changed in the meantime.
    pub async fn reload(&self, ticket: ReloadTicket) {
        let ReloadTicket { user, session } = ticket;
        let result = self.fetch_history(&user.uid).await;

        self.inner.state.send_if_modified(|s| {
            if s.session != session {
                debug!(user_id = %user.uid, "Dropping history load for a previous session");
                return false;
            }
            s.fetching = false;
            match result {
                Ok(loaded) => {
                    info!(user_id = %user.uid, conversations = loaded.len(), "Conversations loaded");
                    s.replace_loaded(loaded);
                }
                Err(e) => {
                    error!(user_id = %user.uid, "Error fetching conversations: {e}");
                    s.conversations.clear();
                }
            }
            true
        });
    }

    async fn fetch_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<(ConversationRecord, Vec<StoredMessage>)>, AppError> {
        let records = self.inner.repository.list_conversations(user_id).await?;
        let mut loaded = Vec::with_capacity(records.len());
        for record in records {
            let messages = self.inner.repository.list_messages(&record.id).await?;
            loaded.push((record, messages));
        }
        Ok(loaded)
    }

    /// Follows `provider` for as long as it lives, reloading on every sign-in.
    pub fn follow_identity(&self, provider: &dyn IdentityProvider) -> JoinHandle<()> {
        let mut rx = provider.subscribe();
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                let auth = rx.borrow_and_update().clone();
                if let Some(ticket) = store.set_identity(auth) {
                    let loader = store.clone();
                    tokio::spawn(async move { loader.reload(ticket).await });
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    // ── Send ────────────────────────────────────────────────────────────────

    pub async fn send_message(&self, content: &str) -> SendOutcome {
        if content.trim().is_empty() {
            return SendOutcome::Skipped;
        }
        if let Err(e) = validate(content) {
            warn!("Rejected message: {e}");
            return SendOutcome::Failed(e.kind());
        }

        let user_message = Message::user(content);
        let title = derive_title(content);
        let mut staged = Err(SendOutcome::Skipped);
        self.inner.state.send_if_modified(|s| {
            let Some(owner) = s.auth.user().cloned() else {
                return false;
            };
            if s.sending || s.fetching {
                staged = Err(SendOutcome::Busy);
                return false;
            }
            s.sending = true;
            staged = Ok(s.stage_user_message(owner, user_message.clone(), title));
            true
        });
        let staged = match staged {
            Ok(staged) => staged,
            Err(outcome) => return outcome,
        };
        let _guard = SendGuard { state: &self.inner.state, session: staged.session };

        let mut exchange = Exchange { staged, user_message, user_confirmed: false, reply: None };
        match self.deliver(&mut exchange, content).await {
            Ok(()) => SendOutcome::Delivered,
            Err(err) => {
                self.recover(&exchange, &err);
                SendOutcome::Failed(err.kind())
            }
        }
    }

    /// Applies `update` unless the send's session has ended.
    fn apply(&self, session: u64, update: impl FnOnce(&mut StoreState)) -> bool {
        self.inner.state.send_if_modified(|s| {
            if s.session != session {
                return false;
            }
            update(s);
            true
        })
    }

    async fn deliver(&self, ex: &mut Exchange, content: &str) -> Result<(), AppError> {
        self.inner.generator.ensure_configured().await?;

        let conversation_id = self.ensure_durable(ex).await?;

        self.inner
            .repository
            .append_message(&conversation_id, ex.user_message.to_new())
            .await?;
        ex.user_confirmed = true;
        let (key, message_id) = (ex.staged.key, ex.user_message.id.clone());
        self.apply(ex.staged.session, |s| {
            s.update_message(key, &message_id, |m| m.status = MessageStatus::Persisted)
        });

        match imagine_prompt(content) {
            Some(prompt) => self.imagine(ex, &conversation_id, prompt).await,
            None => self.stream_reply(ex, &conversation_id, content).await,
        }
    }

    /// Creates the store record for a placeholder conversation.
    async fn ensure_durable(&self, ex: &mut Exchange) -> Result<String, AppError> {
        if let Some(id) = &ex.staged.remote_id {
            return Ok(id.clone());
        }

        let record = NewConversation {
            user_id: ex.staged.owner.uid.clone(),
            title: ex.staged.title.clone(),
            created_at: ex.staged.created_at,
        };
        let id = self.inner.repository.create_conversation(record).await?;
        info!(conversation_id = %id, user_id = %ex.staged.owner.uid, "Conversation created");

        ex.staged.remote_id = Some(id.clone());
        let key = ex.staged.key;
        self.apply(ex.staged.session, |s| {
            if let Some(entry) = s.entry_mut(key) {
                entry.remote_id = Some(id.clone());
            }
        });
        Ok(id)
    }

    async fn imagine(&self, ex: &mut Exchange, conversation_id: &str, prompt: &str) -> Result<(), AppError> {
        debug!(conversation_id, "Generating image");
        let uri = self.inner.generator.generate_image(prompt).await?;

        let reply = Message::image(uri);
        ex.reply = Some(reply.clone());
        let (key, session) = (ex.staged.key, ex.staged.session);
        self.apply(session, |s| s.push_message(key, reply.clone()));

        self.inner.repository.append_message(conversation_id, reply.to_new()).await?;
        ex.reply = None;
        self.apply(session, |s| {
            s.update_message(key, &reply.id, |m| m.status = MessageStatus::Persisted)
        });
        Ok(())
    }

    async fn stream_reply(&self, ex: &mut Exchange, conversation_id: &str, content: &str) -> Result<(), AppError> {
        let (key, session) = (ex.staged.key, ex.staged.session);
        let mut stream = self
            .inner
            .generator
            .generate_text_stream(&ex.staged.history, content)
            .await?;

        let mut full_text = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if fragment.is_empty() {
                continue;
            }
            full_text.push_str(&fragment);

            if let Some(reply) = ex.reply.as_mut() {
                reply.content.clone_from(&full_text);
                let text = &full_text;
                self.apply(session, |s| {
                    s.update_message(key, &reply.id, |m| m.content.clone_from(text))
                });
                continue;
            }
            let reply = Message::streaming(full_text.clone());
            ex.reply = Some(reply.clone());
            self.apply(session, |s| s.push_message(key, reply));
        }

        let Some(mut reply) = ex.reply.clone() else {
            return Err(AppError::empty_result("Text generation"));
        };
        reply.status = MessageStatus::Pending;
        self.apply(session, |s| s.update_message(key, &reply.id, |m| m.status = MessageStatus::Pending));

        self.inner.repository.append_message(conversation_id, reply.to_new()).await?;
        ex.reply = None;
        let live = self.apply(session, |s| {
            s.update_message(key, &reply.id, |m| m.status = MessageStatus::Persisted)
        });
        if !live {
            debug!(conversation_id, "Reply persisted for a previous session");
        }
        Ok(())
    }

    /// Removes whatever this send showed but never got confirmed, then
    /// surfaces the failure.
    fn recover(&self, ex: &Exchange, err: &AppError) {
        let configuration = err.is_configuration();
        if configuration {
            warn!("Generation is not configured: {err}");
        } else {
            error!(conversation_id = ?ex.staged.remote_id, "Error sending message: {err}");
        }

        let staged = &ex.staged;
        self.inner.state.send_modify(|s| {
            if configuration {
                s.configuration_missing = true;
            }
            if s.session != staged.session {
                return;
            }

            if let Some(reply) = &ex.reply {
                s.remove_message(staged.key, &reply.id);
            }
            if !ex.user_confirmed {
                s.remove_message(staged.key, &ex.user_message.id);
            }

            if staged.fresh && !ex.user_confirmed {
                s.remove_conversation(staged.key);
                return;
            }
            if !configuration {
                s.push_message(staged.key, Message::error_notice(err.to_string()));
            }
        });
    }
}

fn validate(content: &str) -> Result<(), AppError> {
    let length = content.chars().count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(AppError::FieldTooLong {
            field_name: "message".to_string(),
            max_length: MAX_MESSAGE_LENGTH,
            actual_length: length,
        });
    }
    if imagine_prompt(content) == Some("") {
        return Err(AppError::EmptyField { field_name: "prompt".to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_message_is_rejected_up_front() {
        let err = validate(&"a".repeat(MAX_MESSAGE_LENGTH + 1)).unwrap_err();
        assert!(err.is_validation());
        assert!(validate(&"a".repeat(MAX_MESSAGE_LENGTH)).is_ok());
    }

    #[test]
    fn bare_imagine_command_needs_a_prompt() {
        assert!(validate("/imagine   ").unwrap_err().is_validation());
        assert!(validate("/imagine a cat").is_ok());
    }
}
