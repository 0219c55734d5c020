use crate::app::{
    AppState, X_AI_PROVIDER, X_CONVERSATION_ID, X_FALLBACK_USED, X_ORIGINAL_PROVIDER, X_RESPONSE_TIME,
};
use crate::auth::client_ip;
use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cardwise_core::domain::recommendation::format_elapsed;
use cardwise_core::domain::User;
use cardwise_core::orchestrator::FallbackInfo;
use cardwise_core::llm::ProviderId;
use futures::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use std::time::Duration;

pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// `POST /chat`. Answers with SSE when the client asks for `text/event-stream`.
pub async fn chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    if wants_event_stream(&headers) {
        return chat_stream(State(state), headers, body).await;
    }
    let (user, body) = admit(&state, &headers, &body)?;

    let outcome = state.orchestrator.handle(&body, user.as_ref()).await?;

    let mut payload = serde_json::to_value(&outcome.response)
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("serialize recommendation response")))?;
    if let Some(id) = &outcome.conversation_id {
        payload["conversationId"] = Value::String(id.clone());
    }

    let mut response = Json(payload).into_response();
    set_provider_headers(
        response.headers_mut(),
        outcome.provider_used,
        outcome.elapsed,
        outcome.fallback.as_ref(),
        outcome.conversation_id.as_deref(),
    );
    Ok(response)
}

/// `POST /chat/stream`: `data: {...}` frames ending in `data: [DONE]` or a single error frame.
pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (user, body) = admit(&state, &headers, &body)?;

    let outcome = state.orchestrator.handle_stream(&body, user.as_ref()).await?;

    let events = outcome
        .events
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.data())));
    let mut response = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
    set_provider_headers(
        response.headers_mut(),
        outcome.provider_used,
        outcome.elapsed,
        outcome.fallback.as_ref(),
        outcome.conversation_id.as_deref(),
    );
    Ok(response)
}

/// Rate limit, authentication and JSON decoding shared by both chat variants.
fn admit(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(Option<User>, Value), ApiError> {
    let ip = client_ip(headers);
    if !state.chat_limiter.is_allowed(&ip) {
        return Err(ApiError::RateLimited);
    }

    let user = state.auth.authenticated_user(headers);
    if state.require_auth && user.is_none() {
        return Err(ApiError::Unauthorized);
    }

    let body = parse_json_body(body)?;
    Ok((user, body))
}

pub(crate) fn parse_json_body(body: &[u8]) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::BadRequest("Request body must be valid JSON".to_string()))
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

fn set_provider_headers(
    headers: &mut HeaderMap,
    provider: ProviderId,
    elapsed: Duration,
    fallback: Option<&FallbackInfo>,
    conversation_id: Option<&str>,
) {
    let mut set = |name: &'static str, value: &str| {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };
    set(X_AI_PROVIDER, provider.as_str());
    set(X_RESPONSE_TIME, &format_elapsed(elapsed));
    if let Some(info) = fallback {
        set(X_FALLBACK_USED, "true");
        set(X_ORIGINAL_PROVIDER, info.original_provider.as_str());
    }
    if let Some(id) = conversation_id {
        set(X_CONVERSATION_ID, id);
    }
}

#[cfg(test)]
mod tests {
    use crate::app::router;
    use crate::testing::{test_state, Behavior};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use cardwise_core::llm::error::FailureKind;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-forwarded-for", "198.51.100.1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read(resp: axum::response::Response) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    #[tokio::test]
    async fn chat_returns_recommendation_with_provider_headers() {
        let state = test_state(Behavior::Structured, Behavior::Structured, false);
        let resp = router(state)
            .oneshot(post("/chat", json!({"message": "best travel card"})))
            .await
            .unwrap();
        let (status, headers, bytes) = read(resp).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-ai-provider"], "anthropic");
        assert!(headers["x-response-time"].to_str().unwrap().ends_with("ms"));
        assert!(headers.get("x-fallback-used").is_none());

        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["recommendedCards"].is_array());
        assert_eq!(body["responseMetadata"]["provider"], json!("anthropic"));
    }

    #[tokio::test]
    async fn fallback_is_reported_in_headers() {
        let state = test_state(Behavior::Fail(FailureKind::Overloaded), Behavior::Structured, false);
        let resp = router(state)
            .oneshot(post("/chat", json!({"message": "cash back"})))
            .await
            .unwrap();
        let (status, headers, _) = read(resp).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-ai-provider"], "openai");
        assert_eq!(headers["x-fallback-used"], "true");
        assert_eq!(headers["x-original-provider"], "anthropic");
    }

    #[tokio::test]
    async fn both_providers_overloaded_is_503() {
        let state = test_state(
            Behavior::Fail(FailureKind::Overloaded),
            Behavior::Fail(FailureKind::Overloaded),
            false,
        );
        let resp = router(state)
            .oneshot(post("/chat", json!({"message": "x"})))
            .await
            .unwrap();
        let (status, _, bytes) = read(resp).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let attempts = body["details"]["attempts"].as_array().unwrap();
        assert_eq!(attempts.len(), 2);
    }

    #[tokio::test]
    async fn overlong_message_is_400() {
        let state = test_state(Behavior::Structured, Behavior::Structured, false);
        let resp = router(state)
            .oneshot(post("/chat", json!({"message": "a".repeat(2001)})))
            .await
            .unwrap();
        let (status, _, bytes) = read(resp).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], json!(400));
        assert!(body["error"].as_str().unwrap().contains("too long"));
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let state = test_state(Behavior::Structured, Behavior::Structured, false);
        let req = Request::builder()
            .method("POST")
            .uri("/chat")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, _) = read(router(state).oneshot(req).await.unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn auth_required_without_user_is_401() {
        let state = test_state(Behavior::Structured, Behavior::Structured, true);
        let app = router(state);
        let resp = app
            .clone()
            .oneshot(post("/chat", json!({"message": "x"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let mut req = post("/chat", json!({"message": "x"}));
        req.headers_mut().insert("x-user-id", "user-9".parse().unwrap());
        let (status, headers, bytes) = read(app.oneshot(req).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let id = body["conversationId"].as_str().unwrap();
        assert_eq!(headers["x-conversation-id"], id);
    }

    #[tokio::test]
    async fn rate_limit_is_enforced_per_client() {
        let state = test_state(Behavior::Structured, Behavior::Structured, false);
        let app = router(state);
        for _ in 0..3 {
            let resp = app.clone().oneshot(post("/chat", json!({"message": "x"}))).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let (status, _, bytes) = read(app.oneshot(post("/chat", json!({"message": "x"}))).await.unwrap()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], json!(429));
    }

    #[tokio::test]
    async fn stream_route_emits_frames_and_done() {
        let state = test_state(Behavior::Text("Try the Citi Double Cash Card."), Behavior::Structured, false);
        let resp = router(state)
            .oneshot(post("/chat/stream", json!({"message": "cash back"})))
            .await
            .unwrap();
        let (status, headers, bytes) = read(resp).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers["content-type"].to_str().unwrap().starts_with("text/event-stream"));
        assert_eq!(headers["x-ai-provider"], "anthropic");

        let text = String::from_utf8(bytes).unwrap();
        let data: Vec<&str> = text
            .split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .collect();
        assert_eq!(data.last(), Some(&"[DONE]"));

        let content: String = data
            .iter()
            .filter_map(|d| serde_json::from_str::<Value>(d).ok())
            .filter_map(|v| v["content"].as_str().map(str::to_string))
            .collect();
        assert_eq!(content, "Try the Citi Double Cash Card.");
    }

    #[tokio::test]
    async fn accept_header_switches_chat_to_sse() {
        let state = test_state(Behavior::Text("plain"), Behavior::Structured, false);
        let mut req = post("/chat", json!({"message": "x"}));
        req.headers_mut().insert("accept", "text/event-stream".parse().unwrap());
        let (_, headers, bytes) = read(router(state).oneshot(req).await.unwrap()).await;
        assert!(headers["content-type"].to_str().unwrap().starts_with("text/event-stream"));
        assert!(String::from_utf8(bytes).unwrap().ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn options_preflight_is_ok() {
        let state = test_state(Behavior::Structured, Behavior::Structured, false);
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/chat")
            .header("origin", "https://app.example")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");

        let state = test_state(Behavior::Structured, Behavior::Structured, false);
        let req = Request::builder().method("OPTIONS").uri("/chat").body(Body::empty()).unwrap();
        assert_eq!(router(state).oneshot(req).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn providers_reports_availability() {
        let state = test_state(Behavior::Structured, Behavior::Unavailable, false);
        let req = Request::builder().uri("/providers").body(Body::empty()).unwrap();
        let (status, _, bytes) = read(router(state).oneshot(req).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["availableProviders"], json!(["anthropic"]));
        assert_eq!(body["providers"]["openai"], json!(false));
        assert_eq!(body["defaultProvider"], json!("anthropic"));
    }
}
