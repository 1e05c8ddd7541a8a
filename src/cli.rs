//! Terminal front end: one more consumer of [`ConversationStore`] snapshots.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::Write;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::errors::ErrorKind;
use crate::identity::SessionIdentity;
use crate::models::{Message, MessageRole, MessageStatus, User};
use crate::service::{ChatSnapshot, ConversationStore, SendOutcome, StoreUpdates};

#[derive(Debug, Parser)]
#[command(name = "genlux", version, about = "Gemini chat with persistent history")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the generation proxy (`POST /api/gemini`).
    Serve,
    /// Chat in the terminal as the given user.
    Chat {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
    },
}

const HELP: &str = "commands: /new  /list  /open <id>  /ack  /quit  (/imagine <prompt> draws)";

/// Prints model output of the active conversation as it arrives.
#[derive(Default)]
struct ReplyPrinter {
    already_shown: HashSet<String>,
    printed: HashMap<String, usize>,
}

impl ReplyPrinter {
    fn starting_at(snapshot: &ChatSnapshot) -> Self {
        let already_shown = snapshot
            .active_conversation()
            .map(|c| c.messages.iter().map(|m| m.id.clone()).collect())
            .unwrap_or_default();
        Self { already_shown, printed: HashMap::new() }
    }

    fn render(&mut self, snapshot: &ChatSnapshot) {
        let Some(conversation) = snapshot.active_conversation() else {
            return;
        };
        let mut out = std::io::stdout().lock();
        for message in &conversation.messages {
            if message.role != MessageRole::Model || self.already_shown.contains(&message.id) {
                continue;
            }
            let shown = self.printed.entry(message.id.clone()).or_insert(0);
            if message.is_image() || message.status == MessageStatus::Ephemeral {
                if *shown == 0 {
                    let _ = writeln!(out, "{}", describe(message));
                    *shown = 1;
                }
                continue;
            }
            if let Some(delta) = message.content.get(*shown..) {
                let _ = write!(out, "{delta}");
                *shown = message.content.len();
            }
        }
        let _ = out.flush();
    }
}

fn describe(message: &Message) -> String {
    match &message.image {
        Some(uri) => format!("[image, {} bytes]", uri.len()),
        None => format!("! {}", message.content),
    }
}

fn print_list(snapshot: &ChatSnapshot) {
    if snapshot.conversations.is_empty() {
        println!("(no conversations)");
    }
    for conversation in &snapshot.conversations {
        let marker = if snapshot.active_conversation_id.as_deref() == Some(conversation.id.as_str()) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {}  {}  ({} messages)",
            conversation.id,
            conversation.title,
            conversation.messages.len()
        );
    }
}

/// Signs `user` in and runs the read-send-print loop until `/quit` or EOF.
pub async fn run_chat(store: ConversationStore, user: User) -> anyhow::Result<()> {
    let identity = SessionIdentity::new();
    let watcher = store.follow_identity(&identity);
    let mut updates = store.subscribe();
    identity.sign_in(user);

    loop {
        let snapshot = updates.snapshot();
        if snapshot.user_id.is_some() && !snapshot.is_loading {
            let name = identity
                .current()
                .user()
                .map(|u| u.display_name.clone().unwrap_or_else(|| u.uid.clone()))
                .unwrap_or_default();
            println!(
                "Signed in as {name}, {} conversation(s) loaded. {HELP}",
                snapshot.conversations.len()
            );
            break;
        }
        if !updates.changed().await {
            anyhow::bail!("conversation store closed");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/new", _) => store.start_new_chat(),
            ("/list", _) => print_list(&store.snapshot()),
            ("/open", id) if !id.trim().is_empty() => store.select_conversation(id.trim()),
            ("/open", _) => println!("usage: /open <id>"),
            ("/ack", _) => store.acknowledge_configuration_error(),
            ("/help", _) => println!("{HELP}"),
            _ => {
                let mut printer = ReplyPrinter::starting_at(&updates.snapshot());
                let outcome =
                    follow_send(store.send_message(line), &mut updates, |s| printer.render(s)).await;
                printer.render(&store.snapshot());
                println!();
                report(outcome, &store);
            }
        }
    }

    identity.sign_out();
    watcher.abort();
    Ok(())
}

/// Drives `send` to completion, handing every intermediate snapshot to
/// `on_change`. Once the feed closes only `send` is awaited.
async fn follow_send(
    send: impl Future<Output = SendOutcome>,
    updates: &mut StoreUpdates,
    mut on_change: impl FnMut(&ChatSnapshot),
) -> SendOutcome {
    tokio::pin!(send);
    loop {
        let open = tokio::select! {
            outcome = &mut send => return outcome,
            open = updates.changed() => open,
        };
        if !open {
            return send.await;
        }
        on_change(&updates.snapshot());
    }
}

fn report(outcome: SendOutcome, store: &ConversationStore) {
    match outcome {
        SendOutcome::Busy => println!("(still working on the previous message)"),
        SendOutcome::Failed(ErrorKind::Validation) => {
            println!("(message rejected: empty /imagine prompt or too long)")
        }
        _ => {}
    }
    if store.is_configuration_missing() {
        println!("API_KEY is not configured for the generation backend. /ack to dismiss.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::agent::GeminiAgentService;
    use crate::config::Config;
    use crate::db::InMemoryChatRepository;

    #[tokio::test]
    async fn closed_feed_stops_rendering_and_waits_for_the_send() {
        let store = ConversationStore::new(
            Arc::new(InMemoryChatRepository::new()),
            Arc::new(GeminiAgentService::new(&Config::default())),
        );
        let mut updates = store.subscribe();
        drop(store);

        let send = async {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            SendOutcome::Delivered
        };
        let mut renders = 0;
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            follow_send(send, &mut updates, |_| renders += 1),
        )
        .await
        .expect("send never completed");

        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(renders, 0);
    }

    #[test]
    fn printer_skips_messages_already_on_screen() {
        let mut conversation = crate::models::Conversation {
            id: "c1".into(),
            title: "t".into(),
            messages: vec![Message::user("hi"), Message::streaming("old reply")],
            created_at: chrono::Utc::now(),
        };
        let mut snapshot = ChatSnapshot {
            user_id: Some("u1".into()),
            conversations: vec![conversation.clone()],
            active_conversation_id: Some("c1".into()),
            ..ChatSnapshot::default()
        };
        let mut printer = ReplyPrinter::starting_at(&snapshot);

        conversation.messages.push(Message::streaming("new"));
        snapshot.conversations = vec![conversation];
        printer.render(&snapshot);

        assert_eq!(printer.printed.len(), 1);
        assert_eq!(printer.printed.values().copied().collect::<Vec<_>>(), vec![3]);
    }
}
