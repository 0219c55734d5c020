mod app;
mod auth;
mod chat;
mod error;
mod search;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use cardwise_core::config::Settings;
use cardwise_core::llm::anthropic::AnthropicClient;
use cardwise_core::llm::openai::OpenAiClient;
use cardwise_core::llm::LlmClient;
use cardwise_core::orchestrator::Orchestrator;
use cardwise_core::ratelimit::FixedWindowRateLimiter;
use cardwise_core::search::SearchService;
use cardwise_core::selector::ProviderSelector;
use cardwise_core::storage::{ConversationStore, InMemoryConversationStore, PgConversationStore};
use cardwise_core::streaming::StreamingBridge;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::auth::TrustedHeaderAuth;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let store: Arc<dyn ConversationStore> = match connect_db(&settings).await {
        Some(pool) => Arc::new(PgConversationStore::new(pool)),
        None => Arc::new(InMemoryConversationStore::new()),
    };

    let anthropic = Arc::new(AnthropicClient::from_settings(&settings)?);
    let openai = Arc::new(OpenAiClient::from_settings(&settings)?);
    let clients: Vec<Arc<dyn LlmClient>> = vec![openai as Arc<dyn LlmClient>, anthropic.clone()];
    let selector = ProviderSelector::new(clients, settings.default_provider_id());

    let available = selector.list_available();
    if available.is_empty() {
        tracing::warn!("no AI provider credentials configured; /chat will answer 503");
    } else {
        tracing::info!(?available, default = ?selector.default_provider(), "AI providers configured");
    }

    let orchestrator = Orchestrator::new(selector, Some(store), StreamingBridge::from_settings(&settings));

    let chat_limiter = FixedWindowRateLimiter::new(settings.chat_rate_limit, settings.rate_limit_window);
    let search_limiter = FixedWindowRateLimiter::new(settings.search_rate_limit, settings.rate_limit_window);
    spawn_limiter_purge(
        vec![chat_limiter.clone(), search_limiter.clone()],
        settings.rate_limit_window,
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        search: SearchService::new(anthropic, settings.search_cache_ttl),
        auth: Arc::new(TrustedHeaderAuth::new(settings.auth_user_header.clone())),
        require_auth: settings.require_auth,
        chat_limiter: Arc::new(chat_limiter),
        search_limiter: Arc::new(search_limiter),
    };

    let app = app::router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Postgres when configured and migrated; otherwise `None` and conversations stay in memory.
async fn connect_db(settings: &Settings) -> Option<PgPool> {
    let db_url = match settings.require_database_url() {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(error = %e, "DATABASE_URL missing; conversations are kept in memory");
            return None;
        }
    };

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
            return None;
        }
    };

    match cardwise_core::storage::migrate(&pool).await {
        Ok(()) => Some(pool),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
            None
        }
    }
}

fn spawn_limiter_purge(limiters: Vec<FixedWindowRateLimiter>, every: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every.max(Duration::from_secs(1)));
        tick.tick().await;
        loop {
            tick.tick().await;
            for limiter in &limiters {
                limiter.purge_expired();
            }
        }
    });
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
