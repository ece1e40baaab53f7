use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::{timestamp, ChatMessage, ConversationId, MessageId, Role};

pub const DEFAULT_SUMMARY_TITLE: &str = "Conversation";
pub const DEFAULT_SUMMARY_PREVIEW: &str = "Open to view details";

const TITLE_CHARS: usize = 30;
const PREVIEW_CHARS: usize = 50;

/// Persisted chat log row, decoded once from the backend's wire shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireChatRecord")]
pub struct ChatRecord {
    pub id: String,
    pub conversation_id: Option<ConversationId>,
    pub timestamp: DateTime<Utc>,
    pub body: RecordBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    User { input: String },
    Assistant { response: String },
    /// Legacy rows that carry both sides of one exchange.
    Exchange {
        input: Option<String>,
        response: Option<String>,
    },
}

impl ChatRecord {
    /// Expands the record into display messages. Message ids are derived from
    /// the record id so reloading the same conversation yields stable ids.
    pub fn to_messages(&self, fallback: Option<&ConversationId>) -> Vec<ChatMessage> {
        let conversation = self.conversation_id.clone().or_else(|| fallback.cloned());
        let make = |role: Role, content: &str| ChatMessage {
            id: MessageId::for_record(&self.id, role),
            role,
            content: content.to_owned(),
            timestamp: self.timestamp,
            conversation_id: conversation.clone(),
            is_typing: false,
            is_error: false,
            is_welcome: false,
            suggestions: Vec::new(),
        };

        match &self.body {
            RecordBody::User { input } => vec![make(Role::User, input)],
            RecordBody::Assistant { response } => vec![make(Role::Assistant, response)],
            RecordBody::Exchange { input, response } => {
                let mut out = Vec::with_capacity(2);
                if let Some(input) = input {
                    out.push(make(Role::User, input));
                }
                if let Some(response) = response {
                    out.push(make(Role::Assistant, response));
                }
                out
            }
        }
    }

    /// First user-authored text in the record, if any.
    pub fn user_text(&self) -> Option<&str> {
        match &self.body {
            RecordBody::User { input } => Some(input),
            RecordBody::Exchange { input, .. } => input.as_deref(),
            RecordBody::Assistant { .. } => None,
        }
    }

    /// Text shown as the conversation preview: the reply when there is one.
    pub fn preview_text(&self) -> Option<&str> {
        match &self.body {
            RecordBody::User { input } => Some(input),
            RecordBody::Assistant { response } => Some(response),
            RecordBody::Exchange { input, response } => {
                response.as_deref().or(input.as_deref())
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChatRecord {
    id: WireId,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    group_id: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl TryFrom<WireChatRecord> for ChatRecord {
    type Error = String;

    fn try_from(wire: WireChatRecord) -> Result<Self, Self::Error> {
        let id = match wire.id {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) if !s.trim().is_empty() => s,
            WireId::Text(_) => return Err("chat record has a blank id".into()),
        };
        let timestamp = wire
            .timestamp
            .ok_or_else(|| format!("chat record {id} has no usable timestamp"))?;
        let input = non_blank(wire.input);
        let response = non_blank(wire.response);

        let body = match (wire.kind.as_deref(), input, response) {
            (Some("user"), Some(input), _) => RecordBody::User { input },
            (Some("assistant"), _, Some(response)) => RecordBody::Assistant { response },
            (_, input, response) => RecordBody::Exchange { input, response },
        };

        Ok(Self {
            id,
            conversation_id: wire.group_id.as_deref().and_then(ConversationId::parse),
            timestamp,
            body,
        })
    }
}

/// Display entry for one past conversation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireConversationSummary")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub last_message: String,
    pub last_timestamp: DateTime<Utc>,
    /// Records of the conversation when the source included them.
    pub messages: Vec<ChatRecord>,
}

impl ConversationSummary {
    /// Derives a summary from the records of one conversation.
    pub fn from_records(id: ConversationId, mut records: Vec<ChatRecord>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        let title = records
            .iter()
            .find_map(ChatRecord::user_text)
            .map(|t| truncate_chars(t, TITLE_CHARS))
            .unwrap_or_else(|| DEFAULT_SUMMARY_TITLE.to_owned());
        let last_message = records
            .iter()
            .rev()
            .find_map(ChatRecord::preview_text)
            .map(|t| truncate_chars(t, PREVIEW_CHARS))
            .unwrap_or_else(|| DEFAULT_SUMMARY_PREVIEW.to_owned());
        let last_timestamp = records
            .last()
            .map(|r| r.timestamp)
            .unwrap_or_else(Utc::now);
        Self {
            id,
            title,
            last_message,
            last_timestamp,
            messages: records,
        }
    }
}

/// Groups flat records by conversation, newest conversation first. Records
/// without a conversation id are dropped.
pub fn group_records(records: Vec<ChatRecord>) -> Vec<ConversationSummary> {
    let mut groups: BTreeMap<String, Vec<ChatRecord>> = BTreeMap::new();
    for record in records {
        if let Some(id) = &record.conversation_id {
            groups.entry(id.0.clone()).or_default().push(record);
        }
    }
    let mut summaries: Vec<ConversationSummary> = groups
        .into_iter()
        .map(|(id, records)| ConversationSummary::from_records(ConversationId(id), records))
        .collect();
    summaries.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
    summaries
}

/// Decodes each element on its own; elements that fail are logged and skipped.
fn decode_each<T: DeserializeOwned>(values: Vec<Value>, what: &str) -> Vec<T> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(error) => {
                warn!(index, %error, "skipping undecodable {what}");
                None
            }
        })
        .collect()
}

/// Decodes the rows of one conversation, skipping rows that are unusable.
pub fn records_from_values(values: Vec<Value>) -> Vec<ChatRecord> {
    decode_each(values, "chat record")
}

/// Decodes a conversation listing, skipping entries that are unusable.
///
/// A listing made only of flat chat rows (no titles or nested messages) is
/// grouped into summaries with [`group_records`].
pub fn summaries_from_values(values: Vec<Value>) -> Vec<ConversationSummary> {
    if !values.is_empty() && values.iter().all(is_flat_record) {
        return group_records(records_from_values(values));
    }
    decode_each(values, "conversation summary")
}

fn is_flat_record(value: &Value) -> bool {
    let has = |field: &str| value.get(field).is_some();
    !has("messages") && !has("title") && !has("lastMessage") && (has("input") || has("response"))
}

fn deserialize_records<'de, D>(deserializer: D) -> Result<Option<Vec<ChatRecord>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.map(records_from_values))
}

fn truncate_chars(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_owned();
    }
    let mut out: String = trimmed.chars().take(max).collect();
    out.push_str("...");
    out
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConversationSummary {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    last_message: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_records")]
    messages: Option<Vec<ChatRecord>>,
}

impl TryFrom<WireConversationSummary> for ConversationSummary {
    type Error = String;

    fn try_from(wire: WireConversationSummary) -> Result<Self, Self::Error> {
        let raw_id = match wire.id {
            Some(WireId::Number(n)) => Some(n.to_string()),
            Some(WireId::Text(s)) => Some(s),
            None => None,
        };
        let id = raw_id
            .as_deref()
            .and_then(ConversationId::parse)
            .or_else(|| wire.group_id.as_deref().and_then(ConversationId::parse))
            .ok_or("conversation summary has no usable id")?;

        let derived = ConversationSummary::from_records(id, wire.messages.unwrap_or_default());
        Ok(Self {
            title: non_blank(wire.title).unwrap_or(derived.title),
            last_message: non_blank(wire.last_message).unwrap_or(derived.last_message),
            last_timestamp: wire.timestamp.unwrap_or(derived.last_timestamp),
            ..derived
        })
    }
}
