use anyhow::Context;
use cardwise_core::config::Settings;
use cardwise_core::llm::anthropic::AnthropicClient;
use cardwise_core::llm::openai::OpenAiClient;
use cardwise_core::llm::{LlmClient, Provider};
use cardwise_core::orchestrator::Orchestrator;
use cardwise_core::selector::ProviderSelector;
use cardwise_core::streaming::{BridgeEvent, StreamingBridge};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cardwise", about = "Credit card recommendations from the terminal")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one recommendation request.
    Ask {
        #[arg(long, short)]
        message: String,

        /// `anthropic`, `openai`, `A` or `B`.
        #[arg(long)]
        provider: Option<String>,

        /// Preferences as a JSON object, e.g. '{"creditScore": 720}'.
        #[arg(long)]
        preferences: Option<String>,

        /// Print the answer as it streams instead of the final JSON.
        #[arg(long)]
        stream: bool,
    },
    /// Show which providers are configured.
    Providers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let selector = build_selector(&settings)?;

    let result = match args.command {
        Command::Providers => print_providers(&selector),
        Command::Ask {
            message,
            provider,
            preferences,
            stream,
        } => {
            let body = chat_body(message, provider, preferences.as_deref())?;
            let orchestrator = Orchestrator::new(selector, None, StreamingBridge::from_settings(&settings));
            if stream {
                ask_streaming(&orchestrator, &body).await
            } else {
                ask(&orchestrator, &body).await
            }
        }
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
    }
    result
}

fn build_selector(settings: &Settings) -> anyhow::Result<ProviderSelector> {
    let clients: Vec<Arc<dyn LlmClient>> = vec![
        Arc::new(OpenAiClient::from_settings(settings)?),
        Arc::new(AnthropicClient::from_settings(settings)?),
    ];
    Ok(ProviderSelector::new(clients, settings.default_provider_id()))
}

fn chat_body(message: String, provider: Option<String>, preferences: Option<&str>) -> anyhow::Result<Value> {
    let mut body = json!({ "message": message });
    if let Some(provider) = provider {
        body["provider"] = Value::String(provider);
    }
    if let Some(raw) = preferences {
        let prefs: Value = serde_json::from_str(raw).context("--preferences must be valid JSON")?;
        body["preferences"] = prefs;
    }
    Ok(body)
}

fn print_providers(selector: &ProviderSelector) -> anyhow::Result<()> {
    let report = json!({
        "defaultProvider": selector.default_provider(),
        "availableProviders": selector.list_available(),
        "providers": {
            "anthropic": selector.is_available(Provider::Anthropic),
            "openai": selector.is_available(Provider::OpenAi),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn ask(orchestrator: &Orchestrator, body: &Value) -> anyhow::Result<()> {
    let outcome = orchestrator.handle(body, None).await?;
    if let Some(info) = &outcome.fallback {
        tracing::warn!(
            original = %info.original_provider,
            used = %outcome.provider_used,
            "answered by fallback provider"
        );
    }
    println!("{}", serde_json::to_string_pretty(&outcome.response)?);
    Ok(())
}

async fn ask_streaming(orchestrator: &Orchestrator, body: &Value) -> anyhow::Result<()> {
    let mut outcome = orchestrator.handle_stream(body, None).await?;
    tracing::info!(provider = %outcome.provider_used, "streaming answer");

    let mut stdout = std::io::stdout();
    while let Some(event) = outcome.events.next().await {
        match event {
            BridgeEvent::Content(chunk) => {
                write!(stdout, "{chunk}")?;
                stdout.flush()?;
            }
            BridgeEvent::Cards(cards) => {
                writeln!(stdout)?;
                for card in cards {
                    writeln!(stdout, "{:>2}. {} ({})", card.rank, card.card_name, card.issuer)?;
                }
            }
            BridgeEvent::Error(message) => {
                writeln!(stdout)?;
                anyhow::bail!("stream failed: {message}");
            }
            BridgeEvent::Done => {
                writeln!(stdout)?;
                break;
            }
        }
    }
    Ok(())
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
