use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use contestmate_schema::{
    ChatRecord, ChatReply, ChatRequest, ChatService, Competition, ConversationId,
    ConversationSummary, HistoryService, InsightsService, RecommendationFilter,
    SkillAnalysisResponse, TrendsRequest, TrendsResponse, UserId, records_from_values,
    summaries_from_values,
};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ApiError;

/// HTTP client for the platform's `/ai` endpoints.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    #[serde(flatten)]
    request: &'a ChatRequest,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationPayload<'a> {
    user_id: UserId,
    category: &'a str,
    difficulty: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserPayload {
    user_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    deleted_count: Option<u64>,
}

impl HttpBackend {
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            client: builder.build().unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn conversation_url(&self, user: UserId, conversation: &ConversationId) -> String {
        self.url(&format!(
            "/ai/chat/conversation/{}/{}",
            user,
            urlencoding::encode(conversation.as_str())
        ))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, endpoint: &'static str, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| ApiError::send(endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = ApiError::status(endpoint, status, &body);
            warn!(endpoint, %status, "backend request failed");
            return Err(err);
        }
        Ok(resp)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        req: RequestBuilder,
    ) -> Result<T, ApiError> {
        let resp = self.send(endpoint, req).await?;
        resp.json::<T>()
            .await
            .map_err(|reason| ApiError::Body { endpoint, reason })
    }
}

#[async_trait]
impl ChatService for HttpBackend {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply> {
        let payload = ChatPayload {
            request: &request,
            timestamp: Utc::now().to_rfc3339(),
        };
        debug!(user = %request.user_id, conversation = %request.group_id, "posting chat message");
        let req = self.client.post(self.url("/ai/chat")).json(&payload);
        Ok(self.call("chat", req).await?)
    }
}

#[async_trait]
impl HistoryService for HttpBackend {
    async fn conversations(&self, user: UserId) -> Result<Vec<ConversationSummary>> {
        let req = self.client.get(self.url(&format!("/ai/chat/history/{user}")));
        let rows: Vec<serde_json::Value> = self.call("chat history", req).await?;
        Ok(summaries_from_values(rows))
    }

    async fn conversation_history(
        &self,
        user: UserId,
        conversation: &ConversationId,
    ) -> Result<Vec<ChatRecord>> {
        let req = self.client.get(self.conversation_url(user, conversation));
        let rows: Vec<serde_json::Value> = self.call("conversation history", req).await?;
        Ok(records_from_values(rows))
    }

    async fn delete_conversation(&self, user: UserId, conversation: &ConversationId) -> Result<bool> {
        let req = self.client.delete(self.conversation_url(user, conversation));
        let resp: DeleteResponse = self.call("delete conversation", req).await?;
        debug!(
            user = %user,
            conversation = %conversation,
            deleted = ?resp.deleted_count,
            "delete conversation answered"
        );
        Ok(resp.success && resp.deleted_count != Some(0))
    }
}

#[async_trait]
impl InsightsService for HttpBackend {
    async fn recommendations(
        &self,
        user: UserId,
        filter: &RecommendationFilter,
    ) -> Result<Vec<Competition>> {
        let payload = RecommendationPayload {
            user_id: user,
            category: &filter.category,
            difficulty: &filter.difficulty,
        };
        let req = self.client.post(self.url("/ai/recommendations")).json(&payload);
        Ok(self.call("recommendations", req).await?)
    }

    async fn analyze_skills(&self, user: UserId) -> Result<SkillAnalysisResponse> {
        let req = self
            .client
            .post(self.url("/ai/analyze-skills"))
            .json(&UserPayload { user_id: user });
        Ok(self.call("skill analysis", req).await?)
    }

    async fn trends(&self, request: &TrendsRequest) -> Result<TrendsResponse> {
        let req = self.client.post(self.url("/ai/trends")).json(request);
        Ok(self.call("trends", req).await?)
    }
}
