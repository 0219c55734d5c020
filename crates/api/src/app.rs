use crate::auth::AuthGateway;
use crate::{chat, search};
use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use cardwise_core::orchestrator::Orchestrator;
use cardwise_core::ratelimit::RateLimiter;
use cardwise_core::search::SearchService;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const X_AI_PROVIDER: &str = "x-ai-provider";
pub const X_RESPONSE_TIME: &str = "x-response-time";
pub const X_FALLBACK_USED: &str = "x-fallback-used";
pub const X_ORIGINAL_PROVIDER: &str = "x-original-provider";
pub const X_CONVERSATION_ID: &str = "x-conversation-id";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub search: SearchService,
    pub auth: Arc<dyn AuthGateway>,
    pub require_auth: bool,
    pub chat_limiter: Arc<dyn RateLimiter>,
    pub search_limiter: Arc<dyn RateLimiter>,
}

pub fn router(state: AppState) -> Router {
    let exposed = [
        X_AI_PROVIDER,
        X_RESPONSE_TIME,
        X_FALLBACK_USED,
        X_ORIGINAL_PROVIDER,
        X_CONVERSATION_ID,
    ]
    .map(HeaderName::from_static);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .expose_headers(exposed);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/providers", get(providers))
        .route("/chat", post(chat::chat).options(chat::preflight))
        .route("/chat/stream", post(chat::chat_stream).options(chat::preflight))
        .route("/search", post(search::search).options(chat::preflight))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn providers(State(state): State<AppState>) -> Json<Value> {
    let selector = state.orchestrator.selector();
    Json(json!({
        "defaultProvider": selector.default_provider(),
        "availableProviders": selector.list_available(),
        "providers": {
            "anthropic": selector.is_available(cardwise_core::llm::Provider::Anthropic),
            "openai": selector.is_available(cardwise_core::llm::Provider::OpenAi),
        },
    }))
}
