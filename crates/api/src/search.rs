use crate::app::AppState;
use crate::auth::client_ip;
use crate::chat::parse_json_body;
use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use cardwise_core::search::{SearchOutcome, SearchQuery};

/// `POST /search`
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SearchOutcome>, ApiError> {
    if !state.search_limiter.is_allowed(&client_ip(&headers)) {
        return Err(ApiError::RateLimited);
    }
    let body = parse_json_body(&body)?;
    let query = SearchQuery::from_body(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let outcome = state.search.search(&query).await?;
    tracing::info!(query = %query.query, cached = outcome.cached, "search served");
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use crate::app::router;
    use crate::testing::{test_state, Behavior};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn post(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/search")
            .header("content-type", "application/json")
            .header("x-real-ip", "192.0.2.10")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_of(resp: axum::response::Response) -> (StatusCode, Value) {
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn second_search_is_cached() {
        let app = router(test_state(Behavior::Structured, Behavior::Structured, false));

        let (status, body) = json_of(app.clone().oneshot(post(json!({"query": "travel"}))).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], json!(false));
        assert_eq!(body["results"]["summary"], json!("results for travel"));
        assert_eq!(body["results"]["toolUsed"], json!(true));

        let (_, body) = json_of(app.oneshot(post(json!({"query": "travel"}))).await.unwrap()).await;
        assert_eq!(body["cached"], json!(true));
    }

    #[tokio::test]
    async fn rejects_bad_queries_and_limits_clients() {
        let app = router(test_state(Behavior::Structured, Behavior::Structured, false));

        let (status, body) = json_of(app.clone().oneshot(post(json!({"query": ""}))).await.unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], json!(400));

        let (status, _) = json_of(app.clone().oneshot(post(json!({"query": "ok"}))).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = json_of(app.oneshot(post(json!({"query": "ok"}))).await.unwrap()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn provider_failure_maps_to_503() {
        let app = router(test_state(Behavior::Structured, Behavior::Structured, false));
        let (status, body) = json_of(app.oneshot(post(json!({"query": "overloaded"}))).await.unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["details"]["provider"], json!("anthropic"));
    }
}
