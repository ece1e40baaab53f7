use contestmate_api::{ApiError, HttpBackend};
use contestmate_schema::{
    ChatRequest, ChatService, ConversationId, HistoryService, InsightsService,
    RecommendationFilter, RecordBody, TrendsRequest, UserId,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> HttpBackend {
    HttpBackend::new(format!("{}/api", server.uri()), None).with_token(Some("t0k3n".into()))
}

#[tokio::test]
async fn chat_posts_request_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ai/chat"))
        .and(header("authorization", "Bearer t0k3n"))
        .and(body_partial_json(json!({
            "message": "hello",
            "context": ["User: hello"],
            "userId": 42,
            "groupId": "group_42_1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "hi there",
            "timestamp": 1714557600000i64,
            "messageId": "m1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = backend(&server)
        .chat(ChatRequest {
            message: "hello".into(),
            context: vec!["User: hello".into()],
            user_id: UserId(42),
            group_id: ConversationId("group_42_1".into()),
        })
        .await
        .unwrap();
    assert_eq!(reply.message, "hi there");
    assert_eq!(reply.message_id.as_deref(), Some("m1"));
    assert!(reply.timestamp.is_some());
    assert!(reply.suggestions.is_empty());
}

#[tokio::test]
async fn chat_failure_surfaces_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ai/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "model offline"})))
        .mount(&server)
        .await;

    let err = backend(&server)
        .chat(ChatRequest {
            message: "x".into(),
            context: vec![],
            user_id: UserId(1),
            group_id: ConversationId("g".into()),
        })
        .await
        .unwrap_err();
    let api = err.downcast_ref::<ApiError>().unwrap();
    assert!(matches!(api, ApiError::Status { message, .. } if message == "model offline"));
}

#[tokio::test]
async fn conversation_list_and_history_decode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ai/chat/history/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "groupId": "group_42_1",
                "title": "Contest ideas",
                "lastMessage": "Try the ICPC regional.",
                "timestamp": "2024-03-02T09:00:05",
                "messages": [
                    {"id": 10, "userId": 42, "type": "user", "input": "Which contest fits me?", "timestamp": "2024-03-02T09:00:00", "groupId": "group_42_1"}
                ]
            }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ai/chat/conversation/42/group_42_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 11, "userId": 42, "type": "assistant", "response": "Try the ICPC regional.", "timestamp": "2024-03-02T09:00:05", "groupId": "group_42_1"},
            {"id": 10, "userId": 42, "input": "Which contest fits me?", "response": null, "timestamp": "2024-03-02T09:00:00", "groupId": "group_42_1"}
        ])))
        .mount(&server)
        .await;

    let backend = backend(&server);
    let summaries = backend.conversations(UserId(42)).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id.as_str(), "group_42_1");
    assert_eq!(summaries[0].title, "Contest ideas");
    assert_eq!(summaries[0].messages.len(), 1);

    let records = backend
        .conversation_history(UserId(42), &ConversationId("group_42_1".into()))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].body,
        RecordBody::Assistant {
            response: "Try the ICPC regional.".into()
        }
    );
    assert_eq!(
        records[1].body,
        RecordBody::Exchange {
            input: Some("Which contest fits me?".into()),
            response: None
        }
    );
}

#[tokio::test]
async fn delete_reports_whether_anything_was_removed() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/ai/chat/conversation/42/group_42_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true, "message": "deleted", "deletedCount": 4
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/ai/chat/conversation/42/gone"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true, "message": "deleted", "deletedCount": 0
        })))
        .mount(&server)
        .await;

    let backend = backend(&server);
    assert!(backend
        .delete_conversation(UserId(42), &ConversationId("group_42_1".into()))
        .await
        .unwrap());
    assert!(!backend
        .delete_conversation(UserId(42), &ConversationId("gone".into()))
        .await
        .unwrap());
}

#[tokio::test]
async fn insight_endpoints_send_user_and_filters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ai/recommendations"))
        .and(body_partial_json(json!({"userId": 42, "category": "Programming", "difficulty": ""})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 3, "title": "ICPC Regional", "category": "Programming", "status": "OPEN"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ai/analyze-skills"))
        .and(body_partial_json(json!({"userId": 42})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "aiAnalysis": "Strong algorithms.",
            "overallScore": 81.5,
            "skillScores": "{\"Algorithms\": 88, \"Design\": 60}",
            "status": "success"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ai/trends"))
        .and(body_partial_json(json!({"userId": 42, "participatedCompetitionId": 3})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "aiAnalysis": "Programming keeps growing.",
            "status": "success"
        })))
        .mount(&server)
        .await;

    let backend = backend(&server);
    let competitions = backend
        .recommendations(UserId(42), &RecommendationFilter::new("Programming", ""))
        .await
        .unwrap();
    assert_eq!(competitions[0].title, "ICPC Regional");
    assert!(competitions[0].score.is_none());

    let skills = backend.analyze_skills(UserId(42)).await.unwrap();
    assert_eq!(skills.skill_scores.get("Algorithms"), Some(&88.0));
    assert_eq!(skills.overall_score, Some(81.5));

    let trends = backend
        .trends(&TrendsRequest {
            user_id: UserId(42),
            participated_competition_id: Some(3),
            available_competition_id: None,
            user_info: None,
        })
        .await
        .unwrap();
    assert_eq!(trends.ai_analysis.as_deref(), Some("Programming keeps growing."));
    assert!(trends.hot_categories.is_none());
}

#[tokio::test]
async fn unreachable_backend_is_a_connect_error() {
    let backend = HttpBackend::new("http://127.0.0.1:1/api", None);
    let err = backend.conversations(UserId(1)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ApiError>(),
        Some(ApiError::Connect { .. })
    ));
}

#[tokio::test]
async fn malformed_rows_do_not_sink_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ai/chat/conversation/42/group_42_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 10, "type": "user", "input": "Which contest fits me?", "timestamp": "2024-03-02T09:00:00"},
            {"id": 11, "type": "assistant", "response": "lost", "timestamp": null},
            {"id": 12, "type": "assistant", "response": "Try the ICPC regional.", "timestamp": [2024, 3, 2, 9, 0, 5]}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ai/chat/history/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "type": "user", "input": "old question", "timestamp": "2024-03-01T09:00:00", "groupId": "group_42_1"},
            {"id": 2, "type": "user", "input": "new question", "timestamp": "2024-03-05T09:00:00", "groupId": "group_42_2"},
            {"id": 3, "type": "user", "input": "broken", "timestamp": {"bad": true}, "groupId": "group_42_2"}
        ])))
        .mount(&server)
        .await;

    let backend = backend(&server);
    let records = backend
        .conversation_history(UserId(42), &ConversationId("group_42_1".into()))
        .await
        .unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["10", "12"]);

    let summaries = backend.conversations(UserId(42)).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id.as_str(), "group_42_2");
    assert_eq!(summaries[0].title, "new question");
    assert_eq!(summaries[1].title, "old question");
}
