pub mod domain;
pub mod llm;
pub mod normalize;
pub mod orchestrator;
pub mod ratelimit;
pub mod search;
pub mod selector;
pub mod storage;
pub mod streaming;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    const DEFAULT_CHAT_RATE_LIMIT: u32 = 10;
    const DEFAULT_SEARCH_RATE_LIMIT: u32 = 20;
    const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
    const DEFAULT_SEARCH_CACHE_TTL_SECS: u64 = 30 * 60;
    const DEFAULT_STREAM_CHUNK_SIZE: usize = 50;
    const DEFAULT_STREAM_CHUNK_DELAY_MS: u64 = 20;
    const DEFAULT_AUTH_USER_HEADER: &str = "x-user-id";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub openai_api_key: Option<String>,
        pub default_provider: Option<String>,
        pub sentry_dsn: Option<String>,
        pub require_auth: bool,
        pub auth_user_header: String,
        pub chat_rate_limit: u32,
        pub search_rate_limit: u32,
        pub rate_limit_window: Duration,
        pub search_cache_ttl: Duration,
        pub stream_chunk_size: usize,
        pub stream_chunk_delay: Duration,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let stream_chunk_size = env_parse("STREAM_CHUNK_SIZE", DEFAULT_STREAM_CHUNK_SIZE);
            anyhow::ensure!(stream_chunk_size >= 1, "STREAM_CHUNK_SIZE must be >= 1");

            Ok(Self {
                database_url: env_non_empty("DATABASE_URL"),
                anthropic_api_key: env_non_empty("ANTHROPIC_API_KEY"),
                openai_api_key: env_non_empty("OPENAI_API_KEY"),
                default_provider: env_non_empty("AI_PROVIDER"),
                sentry_dsn: env_non_empty("SENTRY_DSN"),
                require_auth: env_flag("REQUIRE_AUTH", false)?,
                auth_user_header: env_non_empty("AUTH_USER_HEADER")
                    .unwrap_or_else(|| DEFAULT_AUTH_USER_HEADER.to_string())
                    .to_ascii_lowercase(),
                chat_rate_limit: env_parse("CHAT_RATE_LIMIT", DEFAULT_CHAT_RATE_LIMIT),
                search_rate_limit: env_parse("SEARCH_RATE_LIMIT", DEFAULT_SEARCH_RATE_LIMIT),
                rate_limit_window: Duration::from_secs(env_parse(
                    "RATE_LIMIT_WINDOW_SECS",
                    DEFAULT_RATE_LIMIT_WINDOW_SECS,
                )),
                search_cache_ttl: Duration::from_secs(env_parse(
                    "SEARCH_CACHE_TTL_SECS",
                    DEFAULT_SEARCH_CACHE_TTL_SECS,
                )),
                stream_chunk_size,
                stream_chunk_delay: Duration::from_millis(env_parse(
                    "STREAM_CHUNK_DELAY_MS",
                    DEFAULT_STREAM_CHUNK_DELAY_MS,
                )),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        /// Configured default provider, if `AI_PROVIDER` names a known one.
        pub fn default_provider_id(&self) -> Option<crate::llm::ProviderId> {
            match self.default_provider.as_deref() {
                Some(raw) => {
                    let parsed = crate::llm::ProviderId::parse(raw);
                    if parsed.is_none() {
                        tracing::warn!(value = raw, "AI_PROVIDER is not a known provider; ignoring");
                    }
                    parsed
                }
                None => Some(crate::llm::ProviderId::Anthropic),
            }
        }
    }

    pub(crate) fn env_non_empty(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
        std::env::var(key)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
            .unwrap_or(default)
    }

    /// Unset or blank gives `default`; anything other than a recognised flag word is an error.
    fn env_flag(key: &str, default: bool) -> anyhow::Result<bool> {
        match env_non_empty(key) {
            None => Ok(default),
            Some(raw) => parse_flag(&raw)
                .with_context(|| format!("{key} must be one of true/false/1/0/yes/no/on/off, got {raw:?}")),
        }
    }

    fn parse_flag(raw: &str) -> Option<bool> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

}
