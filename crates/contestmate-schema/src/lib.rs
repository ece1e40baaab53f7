pub mod insights;
pub mod records;
pub mod services;
pub mod timestamp;

pub use insights::*;
pub use records::*;
pub use services::*;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Numeric user id as issued by the platform backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one chat session (the backend calls it `groupId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Accepts an id only if it is non-blank and not the literal `NaN`
    /// that a failed numeric conversion leaves behind.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "NaN" {
            return None;
        }
        Some(Self(raw.to_owned()))
    }

    /// New id for a session started by `user` at `now`. The random suffix
    /// keeps two sessions opened within the same millisecond apart.
    pub fn generate(user: UserId, now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "group_{}_{}_{}",
            user,
            now.timestamp_millis(),
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic id for a message expanded from a backend record.
    pub fn for_record(record_id: &str, role: Role) -> Self {
        match role {
            Role::User => Self(format!("{record_id}_user")),
            Role::Assistant => Self(format!("{record_id}_ai")),
        }
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Prefix used when the message is rendered into the chat context window.
    pub fn context_label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "AI",
        }
    }
}

/// One chat turn as displayed in the assistant panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub is_typing: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_welcome: bool,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ChatMessage {
    fn base(role: Role, content: String, at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            timestamp: at,
            conversation_id: None,
            is_typing: false,
            is_error: false,
            is_welcome: false,
            suggestions: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>, conversation: ConversationId, at: DateTime<Utc>) -> Self {
        Self {
            conversation_id: Some(conversation),
            ..Self::base(Role::User, content.into(), at)
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        conversation: Option<ConversationId>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: conversation,
            ..Self::base(Role::Assistant, content.into(), at)
        }
    }

    /// Synthetic assistant bubble shown in place of a failed operation.
    pub fn error(
        content: impl Into<String>,
        conversation: Option<ConversationId>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content, conversation, at)
        }
    }

    pub fn welcome(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            is_welcome: true,
            ..Self::base(Role::Assistant, content.into(), at)
        }
    }

    pub fn context_line(&self) -> String {
        format!("{}: {}", self.role.context_label(), self.content)
    }
}

/// Signed-in user as persisted under the `user` key of the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn new(id: i64) -> Self {
        Self {
            id: UserId(id),
            username: None,
            major: None,
            avatar_url: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_major(mut self, major: impl Into<String>) -> Self {
        self.major = Some(major.into());
        self
    }
}
