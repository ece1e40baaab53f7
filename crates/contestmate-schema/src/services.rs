use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    timestamp, ChatRecord, Competition, ConversationId, ConversationSummary,
    RecommendationFilter, SkillAnalysisResponse, TrendsRequest, TrendsResponse, UserId,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    /// Recent turns rendered as `User: ...` / `AI: ...` lines, oldest first.
    pub context: Vec<String>,
    pub user_id: UserId,
    pub group_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub message: String,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ChatReply {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: None,
            message_id: None,
            suggestions: Vec::new(),
        }
    }
}

/// AI chat endpoint.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply>;
}

/// Stored conversations of a user.
#[async_trait]
pub trait HistoryService: Send + Sync {
    async fn conversations(&self, user: UserId) -> Result<Vec<ConversationSummary>>;

    async fn conversation_history(
        &self,
        user: UserId,
        conversation: &ConversationId,
    ) -> Result<Vec<ChatRecord>>;

    /// `Ok(false)` when the backend reports nothing was deleted.
    async fn delete_conversation(&self, user: UserId, conversation: &ConversationId)
        -> Result<bool>;
}

#[async_trait]
pub trait InsightsService: Send + Sync {
    async fn recommendations(
        &self,
        user: UserId,
        filter: &RecommendationFilter,
    ) -> Result<Vec<Competition>>;

    async fn analyze_skills(&self, user: UserId) -> Result<SkillAnalysisResponse>;

    async fn trends(&self, request: &TrendsRequest) -> Result<TrendsResponse>;
}
