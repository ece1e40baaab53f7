use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use contestmate_schema::{
    ChatMessage, ChatRecord, ConversationId, ConversationSummary, HistoryService, MessageId,
    UserId,
};
use tracing::{debug, info, warn};

pub const INVALID_CONVERSATION_MESSAGE: &str =
    "Invalid conversation id, the conversation cannot be loaded.";
pub const CONVERSATION_UNAVAILABLE_MESSAGE: &str =
    "This conversation cannot be loaded right now; it may have been cleaned up. Please start a new conversation.";
pub const NETWORK_ERROR_MESSAGE: &str = "Network error, the conversation could not be loaded.";

/// What [`ConversationStore::load_conversation`] ended up showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(usize),
    InvalidId,
    NotFound,
    Failed,
    /// Another load or a reset happened while this one was waiting.
    Superseded,
}

#[derive(Default)]
struct StoreState {
    messages: Vec<ChatMessage>,
    active: Option<ConversationId>,
    summaries: Vec<ConversationSummary>,
    /// Bumped by every operation that replaces the active log.
    epoch: u64,
}

impl StoreState {
    fn replace_log(&mut self, active: Option<ConversationId>, messages: Vec<ChatMessage>) {
        self.active = active;
        self.messages = messages;
        self.epoch += 1;
    }
}

/// The active conversation log plus the list of past conversations.
pub struct ConversationStore {
    history: Arc<dyn HistoryService>,
    state: Mutex<StoreState>,
}

impl ConversationStore {
    pub fn new(history: Arc<dyn HistoryService>) -> Self {
        Self {
            history,
            state: Mutex::new(StoreState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Active log
    // ─────────────────────────────────────────────────────────────────────────

    pub fn append_message(&self, message: ChatMessage) {
        self.lock().messages.push(message);
    }

    /// Applies `f` to the message with `id`. Returns false when the message is
    /// no longer in the active log.
    pub fn update_message(&self, id: &MessageId, f: impl FnOnce(&mut ChatMessage)) -> bool {
        let mut state = self.lock();
        match state.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    pub fn message(&self, id: &MessageId) -> Option<ChatMessage> {
        self.lock().messages.iter().find(|m| &m.id == id).cloned()
    }

    /// Last `limit` messages, oldest first.
    pub fn recent_messages(&self, limit: usize) -> Vec<ChatMessage> {
        let state = self.lock();
        let skip = state.messages.len().saturating_sub(limit);
        state.messages[skip..].to_vec()
    }

    pub fn active_id(&self) -> Option<ConversationId> {
        self.lock().active.clone()
    }

    /// Makes `id` the active conversation with an empty log.
    pub fn begin_conversation(&self, id: ConversationId) {
        info!(conversation = %id, "starting new conversation");
        self.lock().replace_log(Some(id), Vec::new());
    }

    /// Replaces the log with the greeting; no conversation is active.
    pub fn show_welcome(&self, text: &str) {
        self.lock()
            .replace_log(None, vec![ChatMessage::welcome(text, Utc::now())]);
    }

    /// Empties the active log and forgets the active id. The summary list is
    /// kept.
    pub fn clear(&self) {
        self.lock().replace_log(None, Vec::new());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Past conversations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.lock().summaries.clone()
    }

    /// Refreshes the summary list. A failed fetch leaves an empty list.
    pub async fn load_summary_list(&self, user: UserId) -> Vec<ConversationSummary> {
        let summaries = match self.history.conversations(user).await {
            Ok(summaries) => {
                debug!(user = %user, count = summaries.len(), "loaded conversation list");
                summaries
            }
            Err(error) => {
                warn!(user = %user, %error, "failed to load conversation list");
                Vec::new()
            }
        };
        self.lock().summaries.clone_from(&summaries);
        summaries
    }

    /// Shows the conversation `raw_id` in the active log.
    ///
    /// Records come from the cached summary when it carries them, otherwise
    /// from the history service. Every failure is turned into a single error
    /// bubble; nothing is returned as an error.
    pub async fn load_conversation(&self, user: UserId, raw_id: &str) -> LoadOutcome {
        let Some(id) = ConversationId::parse(raw_id) else {
            warn!(raw_id, "refusing to load conversation with invalid id");
            self.show_error(None, INVALID_CONVERSATION_MESSAGE);
            return LoadOutcome::InvalidId;
        };

        let (epoch, cached) = {
            let mut state = self.lock();
            state.replace_log(Some(id.clone()), Vec::new());
            let cached = state
                .summaries
                .iter()
                .find(|s| s.id == id && !s.messages.is_empty())
                .map(|s| s.messages.clone());
            (state.epoch, cached)
        };

        let records = match cached {
            Some(records) => {
                debug!(conversation = %id, count = records.len(), "loading conversation from summary list");
                Ok(records)
            }
            None => self.history.conversation_history(user, &id).await,
        };

        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(conversation = %id, "conversation load superseded");
            return LoadOutcome::Superseded;
        }

        match records {
            Ok(records) => {
                let messages = expand_records(records, &id);
                if messages.is_empty() {
                    warn!(conversation = %id, "conversation has no displayable records");
                    state.messages = vec![error_message(Some(&id), CONVERSATION_UNAVAILABLE_MESSAGE)];
                    return LoadOutcome::NotFound;
                }
                let count = messages.len();
                state.messages = messages;
                info!(conversation = %id, count, "conversation loaded");
                LoadOutcome::Loaded(count)
            }
            Err(error) => {
                warn!(conversation = %id, %error, "failed to load conversation");
                state.messages = vec![error_message(Some(&id), NETWORK_ERROR_MESSAGE)];
                LoadOutcome::Failed
            }
        }
    }

    /// Deletes a conversation on the backend. On success the active log is
    /// cleared if it showed that conversation and the summary list is
    /// reloaded.
    pub async fn delete_conversation(&self, user: UserId, raw_id: &str) -> bool {
        let Some(id) = ConversationId::parse(raw_id) else {
            warn!(raw_id, "refusing to delete conversation with invalid id");
            return false;
        };

        match self.history.delete_conversation(user, &id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(conversation = %id, "backend deleted nothing");
                return false;
            }
            Err(error) => {
                warn!(conversation = %id, %error, "failed to delete conversation");
                return false;
            }
        }

        {
            let mut state = self.lock();
            if state.active.as_ref() == Some(&id) {
                state.replace_log(None, Vec::new());
            }
        }
        info!(conversation = %id, "conversation deleted");
        self.load_summary_list(user).await;
        true
    }

    fn show_error(&self, conversation: Option<&ConversationId>, text: &str) {
        self.lock()
            .replace_log(None, vec![error_message(conversation, text)]);
    }
}

fn error_message(conversation: Option<&ConversationId>, text: &str) -> ChatMessage {
    ChatMessage::error(text, conversation.cloned(), Utc::now())
}

/// Sorts records oldest first and expands them into display messages.
fn expand_records(mut records: Vec<ChatRecord>, conversation: &ConversationId) -> Vec<ChatMessage> {
    records.sort_by_key(|r| r.timestamp);
    records
        .iter()
        .flat_map(|r| r.to_messages(Some(conversation)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use contestmate_schema::Role;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeHistory {
        summaries: Vec<ConversationSummary>,
        records: Vec<ChatRecord>,
        fail: bool,
        history_calls: AtomicUsize,
        delete_calls: AtomicUsize,
    }

    #[async_trait]
    impl HistoryService for FakeHistory {
        async fn conversations(&self, _user: UserId) -> Result<Vec<ConversationSummary>> {
            if self.fail {
                return Err(anyhow!("offline"));
            }
            Ok(self.summaries.clone())
        }

        async fn conversation_history(
            &self,
            _user: UserId,
            _conversation: &ConversationId,
        ) -> Result<Vec<ChatRecord>> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("offline"));
            }
            Ok(self.records.clone())
        }

        async fn delete_conversation(
            &self,
            _user: UserId,
            _conversation: &ConversationId,
        ) -> Result<bool> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("offline"));
            }
            Ok(true)
        }
    }

    fn record(value: serde_json::Value) -> ChatRecord {
        serde_json::from_value(value).unwrap()
    }

    fn unordered_records() -> Vec<ChatRecord> {
        vec![
            record(json!({"id": 2, "type": "assistant", "response": "second", "timestamp": "2024-05-01T10:00:05", "groupId": "g1"})),
            record(json!({"id": 1, "type": "user", "input": "first", "timestamp": "2024-05-01T10:00:00", "groupId": "g1"})),
        ]
    }

    const USER: UserId = UserId(42);

    #[tokio::test]
    async fn invalid_ids_yield_single_error_without_io() {
        let history = Arc::new(FakeHistory::default());
        let store = ConversationStore::new(history.clone());

        for raw in ["", "   ", "NaN"] {
            assert_eq!(store.load_conversation(USER, raw).await, LoadOutcome::InvalidId);
            let messages = store.messages();
            assert_eq!(messages.len(), 1);
            assert!(messages[0].is_error);
            assert_eq!(messages[0].content, INVALID_CONVERSATION_MESSAGE);
            assert!(store.active_id().is_none());
        }
        assert!(!store.delete_conversation(USER, "NaN").await);
        assert_eq!(history.history_calls.load(Ordering::SeqCst), 0);
        assert_eq!(history.delete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn loads_from_history_sorted_by_time() {
        let history = Arc::new(FakeHistory {
            records: unordered_records(),
            ..Default::default()
        });
        let store = ConversationStore::new(history.clone());

        assert_eq!(store.load_conversation(USER, "g1").await, LoadOutcome::Loaded(2));
        let messages = store.messages();
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[0].id.0, "1_user");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(store.active_id().unwrap().as_str(), "g1");
        assert_eq!(history.history_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn summary_records_are_preferred_over_backend() {
        let summary = ConversationSummary::from_records(ConversationId("g1".into()), unordered_records());
        let history = Arc::new(FakeHistory {
            summaries: vec![summary],
            ..Default::default()
        });
        let store = ConversationStore::new(history.clone());
        store.load_summary_list(USER).await;

        assert_eq!(store.load_conversation(USER, "g1").await, LoadOutcome::Loaded(2));
        assert_eq!(history.history_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_and_failed_loads_show_one_error() {
        let store = ConversationStore::new(Arc::new(FakeHistory::default()));
        assert_eq!(store.load_conversation(USER, "g9").await, LoadOutcome::NotFound);
        let messages = store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, CONVERSATION_UNAVAILABLE_MESSAGE);

        let failing = ConversationStore::new(Arc::new(FakeHistory {
            fail: true,
            ..Default::default()
        }));
        assert_eq!(failing.load_conversation(USER, "g9").await, LoadOutcome::Failed);
        let messages = failing.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, NETWORK_ERROR_MESSAGE);
        assert!(failing.load_summary_list(USER).await.is_empty());
    }

    #[tokio::test]
    async fn deleting_the_active_conversation_clears_it() {
        let history = Arc::new(FakeHistory {
            records: unordered_records(),
            ..Default::default()
        });
        let store = ConversationStore::new(history.clone());
        store.load_conversation(USER, "g1").await;

        assert!(store.delete_conversation(USER, "g1").await);
        assert!(store.active_id().is_none());
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn deleting_another_conversation_keeps_active_log() {
        let history = Arc::new(FakeHistory {
            records: unordered_records(),
            ..Default::default()
        });
        let store = ConversationStore::new(history.clone());
        store.load_conversation(USER, "g1").await;

        assert!(store.delete_conversation(USER, "g2").await);
        assert_eq!(store.active_id().unwrap().as_str(), "g1");
        assert_eq!(store.messages().len(), 2);
    }

    #[tokio::test]
    async fn failed_delete_changes_nothing() {
        let store = ConversationStore::new(Arc::new(FakeHistory {
            fail: true,
            ..Default::default()
        }));
        store.begin_conversation(ConversationId("g1".into()));
        assert!(!store.delete_conversation(USER, "g1").await);
        assert_eq!(store.active_id().unwrap().as_str(), "g1");
    }

    #[test]
    fn clear_keeps_summaries_and_update_targets_by_id() {
        let store = ConversationStore::new(Arc::new(FakeHistory::default()));
        let msg = ChatMessage::assistant("", None, Utc::now());
        let id = msg.id.clone();
        store.append_message(msg);
        assert!(store.update_message(&id, |m| m.content.push_str("hi")));
        assert_eq!(store.message(&id).unwrap().content, "hi");

        store.clear();
        assert!(!store.update_message(&id, |m| m.content.push('!')));
        assert!(store.messages().is_empty());
    }

    #[test]
    fn recent_messages_returns_tail_in_order() {
        let store = ConversationStore::new(Arc::new(FakeHistory::default()));
        let conv = ConversationId("g".into());
        for i in 0..8 {
            store.append_message(ChatMessage::user(format!("m{i}"), conv.clone(), Utc::now()));
        }
        let tail: Vec<String> = store.recent_messages(6).into_iter().map(|m| m.content).collect();
        assert_eq!(tail, vec!["m2", "m3", "m4", "m5", "m6", "m7"]);
    }
}
