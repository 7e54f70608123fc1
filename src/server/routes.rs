//! HTTP route handlers for the chat relay API.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::chat::TurnRequest;
use crate::config::UpstreamErrorPolicy;
use crate::conversation::{ChatMessage, Conversation, ConversationSummary, Role};
use crate::error::{RelayError, RelayResult};

use super::error::ApiError;
use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversation/{session_id}", get(get_conversation))
        .route(
            "/api/conversation/{session_id}/rename",
            put(rename_conversation),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chat-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Chat request.
///
/// With a `sessionId` the turn is stored; the new user message is `content`,
/// or else the last entry of `messages`. Without one the turn is ephemeral and
/// `messages` (plus `content`, if given) is sent as the full history.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Conversation key chosen by the client.
    pub session_id: Option<String>,
    /// Client-side history, oldest first.
    pub messages: Option<Vec<ChatMessage>>,
    /// New user message.
    pub content: Option<String>,
}

impl ChatRequest {
    /// Resolve the request into a turn.
    ///
    /// # Errors
    /// Returns [`RelayError::Validation`] when no user message can be found.
    pub fn into_turn(self) -> RelayResult<TurnRequest> {
        let Self {
            session_id,
            messages,
            content,
        } = self;

        if let Some(session_id) = session_id {
            let content = match (content, messages) {
                (Some(content), _) => content,
                (None, Some(messages)) => last_user_content(messages)?,
                (None, None) => return Err(missing_message()),
            };
            return Ok(TurnRequest::Persisted {
                session_id,
                content,
            });
        }

        let mut history = messages.unwrap_or_default();
        if let Some(content) = content {
            history.push(ChatMessage::user(content));
        }
        if history.is_empty() {
            return Err(missing_message());
        }
        Ok(TurnRequest::Ephemeral { messages: history })
    }
}

fn last_user_content(messages: Vec<ChatMessage>) -> RelayResult<String> {
    match messages.into_iter().last() {
        Some(message) if message.role == Role::User => Ok(message.content),
        Some(_) => Err(RelayError::Validation(
            "the last message must come from the user".to_string(),
        )),
        None => Err(missing_message()),
    }
}

fn missing_message() -> RelayError {
    RelayError::Validation("either `content` or `messages` is required".to_string())
}

/// Chat response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The assistant's reply.
    pub reply: String,
}

/// Run one chat turn.
async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    let turn = request.into_turn()?;

    match state.orchestrator.run(turn).await {
        Ok(reply) => Ok(Json(ChatResponse { reply })),
        Err(RelayError::Upstream(err))
            if matches!(state.upstream_errors, UpstreamErrorPolicy::Compat) =>
        {
            Ok(Json(ChatResponse {
                reply: err.sentinel_reply(),
            }))
        }
        Err(err) => Err(err.into()),
    }
}

/// Fetch one conversation with its full history.
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state.orchestrator.conversation(&session_id).await?;
    Ok(Json(conversation))
}

/// List conversation summaries, most recently updated first.
async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let conversations = state.orchestrator.conversations().await?;
    Ok(Json(conversations))
}

/// Rename request.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    /// New title.
    pub title: Option<String>,
}

/// Rename response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameResponse {
    /// Session that was renamed.
    pub session_id: String,
    /// Title now stored.
    pub title: String,
}

/// Set a conversation's title.
async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> Result<Json<RenameResponse>, ApiError> {
    let Json(request) = payload?;
    let title = request
        .title
        .ok_or_else(|| RelayError::Validation("`title` is required".to_string()))?;

    let renamed = state.orchestrator.rename(&session_id, &title).await?;
    Ok(Json(RenameResponse {
        session_id: renamed.session_id,
        title: renamed.title,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{NO_REPLY_SENTINEL, UpstreamError};
    use crate::test_support::{self, ScriptedCompletion};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn app_with(
        completion: Arc<ScriptedCompletion>,
        policy: UpstreamErrorPolicy,
    ) -> Router {
        let (orchestrator, _store) = test_support::orchestrator(completion).await;
        create_router(AppState::new(orchestrator, policy))
    }

    async fn echo_app() -> Router {
        app_with(ScriptedCompletion::echo(), UpstreamErrorPolicy::Strict).await
    }

    fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[test]
    fn test_into_turn_prefers_content_for_sessions() {
        let request = ChatRequest {
            session_id: Some("s1".into()),
            messages: Some(vec![ChatMessage::user("old")]),
            content: Some("new".into()),
        };
        assert_eq!(
            request.into_turn().unwrap(),
            TurnRequest::Persisted {
                session_id: "s1".into(),
                content: "new".into()
            }
        );
    }

    #[test]
    fn test_into_turn_takes_last_message_for_sessions() {
        let request = ChatRequest {
            session_id: Some("s1".into()),
            messages: Some(vec![
                ChatMessage::user("first"),
                ChatMessage::assistant("reply"),
                ChatMessage::user("second"),
            ]),
            content: None,
        };
        assert_eq!(
            request.into_turn().unwrap(),
            TurnRequest::Persisted {
                session_id: "s1".into(),
                content: "second".into()
            }
        );
    }

    #[test]
    fn test_into_turn_rejects_trailing_assistant_message() {
        let request = ChatRequest {
            session_id: Some("s1".into()),
            messages: Some(vec![ChatMessage::assistant("reply")]),
            content: None,
        };
        assert!(matches!(request.into_turn(), Err(RelayError::Validation(_))));
    }

    #[test]
    fn test_into_turn_without_session_is_ephemeral() {
        let request = ChatRequest {
            session_id: None,
            messages: Some(vec![ChatMessage::user("a"), ChatMessage::assistant("b")]),
            content: Some("c".into()),
        };
        let TurnRequest::Ephemeral { messages } = request.into_turn().unwrap() else {
            panic!("expected an ephemeral turn");
        };
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], ChatMessage::user("c"));
    }

    #[test]
    fn test_into_turn_requires_a_message() {
        assert!(matches!(
            ChatRequest::default().into_turn(),
            Err(RelayError::Validation(_))
        ));
        let request = ChatRequest {
            session_id: Some("s1".into()),
            ..ChatRequest::default()
        };
        assert!(matches!(request.into_turn(), Err(RelayError::Validation(_))));
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = echo_app().await;
        let (status, body) = send(&app, get_request("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "chat-relay");
    }

    #[tokio::test]
    async fn test_chat_persists_and_conversation_is_readable() {
        let app = echo_app().await;

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/chat",
                &json!({ "sessionId": "s1", "content": "Hello there" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "echo: Hello there");

        let (status, body) = send(&app, get_request("/api/conversation/s1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], "s1");
        assert_eq!(body["title"], "Hello there");
        assert!(body["createdAt"].is_string());
        assert!(body["updatedAt"].is_string());

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "Hello there");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "echo: Hello there");
        assert!(messages[0]["id"].is_number());
        assert!(messages[0]["createdAt"].is_string());
    }

    #[tokio::test]
    async fn test_chat_accepts_messages_array_with_session() {
        let app = echo_app().await;
        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/chat",
                &json!({
                    "sessionId": "s1",
                    "messages": [{ "role": "user", "content": "from array" }]
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "echo: from array");
    }

    #[tokio::test]
    async fn test_chat_without_session_stores_nothing() {
        let app = echo_app().await;
        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/chat",
                &json!({ "messages": [{ "role": "user", "content": "just once" }] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "echo: just once");

        let (status, body) = send(&app, get_request("/api/conversations")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_chat_rejects_malformed_json() {
        let app = echo_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_chat_rejects_blank_content() {
        let app = echo_app().await;
        let (status, body) = send(
            &app,
            json_request("POST", "/api/chat", &json!({ "sessionId": "s1", "content": "  " })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let app = echo_app().await;
        let (status, body) = send(&app, get_request("/api/conversation/missing")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
        assert!(body["message"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_list_conversations_most_recent_first() {
        let app = echo_app().await;
        for session in ["a", "b", "a"] {
            let (status, _) = send(
                &app,
                json_request(
                    "POST",
                    "/api/chat",
                    &json!({ "sessionId": session, "content": format!("hi {session}") }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(&app, get_request("/api/conversations")).await;
        assert_eq!(status, StatusCode::OK);

        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["sessionId"], "a");
        assert_eq!(list[0]["messageCount"], 4);
        assert_eq!(list[1]["sessionId"], "b");
        assert_eq!(list[1]["messageCount"], 2);
        assert!(list[0].get("messages").is_none());
    }

    #[tokio::test]
    async fn test_rename_conversation() {
        let app = echo_app().await;
        send(
            &app,
            json_request("POST", "/api/chat", &json!({ "sessionId": "s1", "content": "hello" })),
        )
        .await;

        let (status, body) = send(
            &app,
            json_request(
                "PUT",
                "/api/conversation/s1/rename",
                &json!({ "title": "Trip planning" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "sessionId": "s1", "title": "Trip planning" }));

        let (_, body) = send(&app, get_request("/api/conversation/s1")).await;
        assert_eq!(body["title"], "Trip planning");
    }

    #[tokio::test]
    async fn test_rename_errors() {
        let app = echo_app().await;

        let (status, body) = send(
            &app,
            json_request("PUT", "/api/conversation/nope/rename", &json!({ "title": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) = send(
            &app,
            json_request("PUT", "/api/conversation/nope/rename", &json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_strict_policy_reports_upstream_failure() {
        let completion = ScriptedCompletion::with_outcomes([Err(UpstreamError::EmptyChoices)]);
        let app = app_with(completion, UpstreamErrorPolicy::Strict).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/api/chat", &json!({ "sessionId": "s1", "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "upstream_error");

        let (_, body) = send(&app, get_request("/api/conversation/s1")).await;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[tokio::test]
    async fn test_strict_policy_hides_provider_response_body() {
        let completion = ScriptedCompletion::with_outcomes([Err(UpstreamError::status(
            401,
            "invalid key sk-live-abc",
        ))]);
        let app = app_with(completion, UpstreamErrorPolicy::Strict).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/api/chat", &json!({ "sessionId": "s1", "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "upstream_error");
        assert!(!body["message"].as_str().unwrap().contains("sk-live-abc"));
    }

    #[tokio::test]
    async fn test_strict_policy_maps_timeout_to_gateway_timeout() {
        let completion = ScriptedCompletion::with_outcomes([Err(UpstreamError::Timeout)]);
        let app = app_with(completion, UpstreamErrorPolicy::Strict).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/api/chat", &json!({ "sessionId": "s1", "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "upstream_timeout");
    }

    #[tokio::test]
    async fn test_compat_policy_returns_sentinel_reply() {
        let completion = ScriptedCompletion::with_outcomes([Err(UpstreamError::EmptyChoices)]);
        let app = app_with(completion, UpstreamErrorPolicy::Compat).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/api/chat", &json!({ "sessionId": "s1", "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], NO_REPLY_SENTINEL);

        let (_, body) = send(&app, get_request("/api/conversation/s1")).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }
}
