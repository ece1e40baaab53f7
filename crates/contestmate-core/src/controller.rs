use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use contestmate_cache::{CacheKey, CacheLayer, Namespace};
use contestmate_schema::{
    ChatMessage, ChatRequest, ChatService, ConversationId, ConversationSummary, MessageId,
    UserId, UserProfile,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationStore, LoadOutcome};
use crate::typewriter::Typewriter;
use crate::{ChatError, ClientConfig, Identity};

pub const CHAT_UNAVAILABLE_MESSAGE: &str = "Sorry, the AI service is temporarily unavailable. \
This may be because:\n\n• the server is under maintenance\n• the network connection failed\n\
• the API configuration needs to be updated\n\nPlease try again later or contact an administrator.";

const WELCOME_BODY: &str = "I can help you:\n• recommend suitable competitions\n\
• analyze your skill level\n• plan your studies\n• answer competition questions\n\n\
What can I do for you?";

pub fn welcome_text(user: Option<&UserProfile>) -> String {
    match user.and_then(|u| u.username.as_deref()) {
        Some(name) => format!("Hello {name}! I'm your AI competition assistant.\n\n{WELCOME_BODY}"),
        None => format!("Hello! I'm the AI competition assistant.\n\n{WELCOME_BODY}"),
    }
}

/// Canned prompts offered next to the input box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickAction {
    Recommend,
    Skills,
    Trends,
    Help,
}

impl QuickAction {
    pub fn prompt(&self) -> &'static str {
        match self {
            Self::Recommend => "Please recommend some competitions that suit me.",
            Self::Skills => "Please analyze my skill level.",
            Self::Trends => "Which types of competitions are popular right now?",
            Self::Help => "I'm new to competitions. How should I get started?",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "recommend" => Some(Self::Recommend),
            "skills" => Some(Self::Skills),
            "trends" => Some(Self::Trends),
            "help" => Some(Self::Help),
            _ => None,
        }
    }
}

/// What became of one `send_message` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input, or another send was still waiting for its reply.
    Ignored,
    /// The reply is being typed into the message with this id.
    Replied(MessageId),
    /// The chat call failed and an error bubble was appended.
    Failed,
    /// The active conversation changed before the reply arrived; the reply
    /// was dropped.
    Superseded,
}

/// Local copy of the latest exchange, written after every completed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistorySnapshot {
    pub messages: Vec<ChatMessage>,
    pub last_updated: DateTime<Utc>,
}

struct SendingGuard<'a>(&'a AtomicBool);

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives the chat panel: sending, typing replies out, switching and
/// deleting conversations.
pub struct ChatSessionController {
    chat: Arc<dyn ChatService>,
    store: Arc<ConversationStore>,
    cache: Arc<CacheLayer>,
    identity: Identity,
    config: ClientConfig,
    sending: AtomicBool,
    typing: Arc<AtomicBool>,
    /// Incremented for every reply; lets a finishing reply tell whether it is
    /// still the latest one.
    reply_seq: Arc<AtomicU64>,
    typewriter: Mutex<Option<Typewriter>>,
    completion: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChatSessionController {
    pub fn new(
        chat: Arc<dyn ChatService>,
        store: Arc<ConversationStore>,
        cache: Arc<CacheLayer>,
        identity: Identity,
        config: ClientConfig,
    ) -> Self {
        Self {
            chat,
            store,
            cache,
            identity,
            config,
            sending: AtomicBool::new(false),
            typing: Arc::new(AtomicBool::new(false)),
            reply_seq: Arc::new(AtomicU64::new(0)),
            typewriter: Mutex::new(None),
            completion: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn is_loading(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub fn is_typing(&self) -> bool {
        self.typing.load(Ordering::Acquire)
    }

    fn require_user(&self) -> Result<UserProfile, ChatError> {
        self.identity.current_user().ok_or(ChatError::NotSignedIn)
    }

    /// Sends `text` in the active conversation, starting a new one if needed.
    ///
    /// Returns once the reply has started typing out; use
    /// [`wait_for_reply`](Self::wait_for_reply) to wait for the rest.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        let user = self.require_user()?;

        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("send ignored, previous message still waiting for a reply");
            return Ok(SendOutcome::Ignored);
        }
        let _sending = SendingGuard(&self.sending);

        let conversation = match self.store.active_id() {
            Some(id) => id,
            None => {
                let id = ConversationId::generate(user.id, Utc::now());
                self.store.begin_conversation(id.clone());
                id
            }
        };

        self.store
            .append_message(ChatMessage::user(text, conversation.clone(), Utc::now()));

        let context = self
            .store
            .recent_messages(self.config.context_window)
            .iter()
            .map(ChatMessage::context_line)
            .collect();
        let request = ChatRequest {
            message: text.to_owned(),
            context,
            user_id: user.id,
            group_id: conversation.clone(),
        };

        debug!(user = %user.id, conversation = %conversation, "sending chat message");
        let reply = match self.chat.chat(request).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(user = %user.id, conversation = %conversation, %error, "chat request failed");
                if self.store.active_id().as_ref() == Some(&conversation) {
                    self.store.append_message(ChatMessage::error(
                        CHAT_UNAVAILABLE_MESSAGE,
                        Some(conversation),
                        Utc::now(),
                    ));
                }
                return Ok(SendOutcome::Failed);
            }
        };

        if self.store.active_id().as_ref() != Some(&conversation) {
            warn!(conversation = %conversation, "conversation changed before the reply arrived, dropping reply");
            return Ok(SendOutcome::Superseded);
        }

        self.stop_typing();

        let mut message = ChatMessage::assistant(
            "",
            Some(conversation.clone()),
            reply.timestamp.unwrap_or_else(Utc::now),
        );
        message.is_typing = true;
        message.suggestions = reply.suggestions;
        let message_id = message.id.clone();
        self.store.append_message(message);

        self.start_typing(user.id, conversation, message_id.clone(), reply.message);
        Ok(SendOutcome::Replied(message_id))
    }

    fn start_typing(&self, user: UserId, conversation: ConversationId, id: MessageId, text: String) {
        let seq = self.reply_seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.typing.store(true, Ordering::Release);

        let sink = {
            let store = Arc::clone(&self.store);
            let id = id.clone();
            move |partial: &str| {
                store.update_message(&id, |m| m.content = partial.to_owned());
            }
        };
        let typewriter = Typewriter::new(text, self.config.typewriter_interval(), sink);
        let finished = typewriter.finished();
        typewriter.start();
        *lock(&self.typewriter) = Some(typewriter);

        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let typing = Arc::clone(&self.typing);
        let reply_seq = Arc::clone(&self.reply_seq);
        let limit = self.config.history_snapshot_limit;

        let handle = tokio::spawn(async move {
            finished.await;
            store.update_message(&id, |m| m.is_typing = false);
            if reply_seq.load(Ordering::Acquire) == seq {
                typing.store(false, Ordering::Release);
            }
            if store.active_id().as_ref() == Some(&conversation) {
                persist_snapshot(&cache, &store, user, limit);
            }
        });
        *lock(&self.completion) = Some(handle);
    }

    /// Waits until the reply currently typing out has finished and its
    /// snapshot is written.
    pub async fn wait_for_reply(&self) {
        let handle = lock(&self.completion).take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(%error, "reply completion task failed");
            }
        }
    }

    fn stop_typing(&self) {
        let previous = lock(&self.typewriter).take();
        if let Some(typewriter) = previous {
            typewriter.stop();
        }
    }

    /// Shows the rest of the reply immediately.
    pub fn skip_typing(&self) {
        let current = lock(&self.typewriter).clone();
        if let Some(typewriter) = current {
            typewriter.complete();
        }
    }

    /// Resets to a fresh panel showing only the greeting.
    pub fn initialize_chat(&self) {
        self.stop_typing();
        let user = self.identity.current_user();
        self.store.show_welcome(&welcome_text(user.as_ref()));
    }

    /// Like [`initialize_chat`](Self::initialize_chat), and also forgets the
    /// local history snapshot.
    pub fn clear_chat(&self) -> Result<(), ChatError> {
        self.stop_typing();
        self.store.clear();
        let user = self.identity.current_user();
        if let Some(user) = &user {
            self.cache.invalidate(&CacheKey::chat_history(user.id))?;
        }
        self.store.show_welcome(&welcome_text(user.as_ref()));
        Ok(())
    }

    pub async fn quick_action(&self, action: QuickAction) -> Result<SendOutcome, ChatError> {
        self.send_message(action.prompt()).await
    }

    pub async fn load_summary_list(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        let user = self.require_user()?;
        Ok(self.store.load_summary_list(user.id).await)
    }

    pub async fn load_conversation(&self, raw_id: &str) -> Result<LoadOutcome, ChatError> {
        let user = self.require_user()?;
        self.stop_typing();
        Ok(self.store.load_conversation(user.id, raw_id).await)
    }

    /// Deletes a conversation. Also drops the local snapshot when it holds
    /// messages of that conversation.
    pub async fn delete_conversation(&self, raw_id: &str) -> Result<bool, ChatError> {
        let user = self.require_user()?;
        let was_active = self
            .store
            .active_id()
            .is_some_and(|active| active.as_str() == raw_id);

        if !self.store.delete_conversation(user.id, raw_id).await {
            return Ok(false);
        }
        if was_active {
            self.stop_typing();
        }

        let key = CacheKey::chat_history(user.id);
        let holds_deleted = self
            .cache
            .get::<ChatHistorySnapshot>(&key)
            .is_some_and(|snapshot| {
                snapshot
                    .messages
                    .iter()
                    .any(|m| m.conversation_id.as_ref().is_some_and(|c| c.as_str() == raw_id))
            });
        if holds_deleted {
            self.cache.invalidate(&key)?;
            debug!(conversation = raw_id, "dropped history snapshot of deleted conversation");
        }
        Ok(true)
    }

    pub fn history_snapshot(&self) -> Option<ChatHistorySnapshot> {
        let user = self.identity.current_user()?;
        self.cache.get(&CacheKey::chat_history(user.id))
    }
}

fn persist_snapshot(cache: &CacheLayer, store: &ConversationStore, user: UserId, limit: usize) {
    let snapshot = ChatHistorySnapshot {
        messages: store.recent_messages(limit),
        last_updated: cache.now(),
    };
    let key = CacheKey::chat_history(user);
    match cache.put(&key, Namespace::ChatHistory.ttl(), &snapshot) {
        Ok(()) => info!(user = %user, messages = snapshot.messages.len(), "chat history snapshot saved"),
        Err(error) => warn!(user = %user, %error, "failed to save chat history snapshot"),
    }
}
