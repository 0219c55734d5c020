use crate::domain::recommendation::RecommendationResponse;
use crate::domain::request::ProviderRequest;
use crate::domain::{User, ValidationError};
use crate::llm::error::{FailureKind, ProviderError};
use crate::llm::{InvokeMode, ProviderId, RawProviderResult, TextStream};
use crate::normalize;
use crate::selector::{NoProviderAvailable, ProviderSelector};
use crate::storage::{ConversationMetadata, ConversationStore, NewMessage};
use crate::streaming::{BridgeEvent, BridgeSource, CompletionHook, StreamingBridge};
use futures::{FutureExt, StreamExt};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Primary,
    Fallback,
}

/// Request lifecycle. `Done` and `Failed` are terminal. A streamed request leaves
/// [`Orchestrator::handle_stream`] in `Streaming`; the bridge reports `Done` once the text ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Selecting,
    Invoking(Attempt),
    Persisting,
    Streaming,
    Done,
    Failed,
}

struct Run {
    stage: Stage,
    started: Instant,
}

impl Run {
    fn start() -> Self {
        tracing::debug!(stage = ?Stage::Validating, "orchestrator started");
        Self {
            stage: Stage::Validating,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: Stage) {
        tracing::debug!(from = ?self.stage, to = ?next, "orchestrator transition");
        self.stage = next;
    }

    fn fail(&mut self, err: OrchestratorError) -> OrchestratorError {
        self.advance(Stage::Failed);
        err
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Clone)]
pub enum OrchestratorError {
    Validation(ValidationError),
    NoProviderAvailable,
    /// Non-retryable failure, or a retryable one with no alternate to fall back to.
    ProviderFailed(ProviderError),
    /// Both the primary and the fallback attempt failed.
    Exhausted {
        primary: ProviderError,
        fallback: ProviderError,
    },
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Validation(err) => write!(f, "{err}"),
            OrchestratorError::NoProviderAvailable => write!(f, "{NoProviderAvailable}"),
            OrchestratorError::ProviderFailed(err) => write!(f, "{err}"),
            OrchestratorError::Exhausted { primary, fallback } => write!(
                f,
                "All AI providers failed ({}: {}; {}: {})",
                primary.provider, primary.message, fallback.provider, fallback.message
            ),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<ValidationError> for OrchestratorError {
    fn from(err: ValidationError) -> Self {
        OrchestratorError::Validation(err)
    }
}

impl From<NoProviderAvailable> for OrchestratorError {
    fn from(_: NoProviderAvailable) -> Self {
        OrchestratorError::NoProviderAvailable
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackInfo {
    pub original_provider: ProviderId,
    pub original_error: String,
}

#[derive(Debug)]
pub struct ChatOutcome {
    pub response: RecommendationResponse,
    pub provider_used: ProviderId,
    pub fallback: Option<FallbackInfo>,
    pub elapsed: Duration,
    pub conversation_id: Option<String>,
}

pub struct StreamOutcome {
    pub provider_used: ProviderId,
    pub fallback: Option<FallbackInfo>,
    /// Time until the provider started answering.
    pub elapsed: Duration,
    pub conversation_id: Option<String>,
    pub events: ReceiverStream<BridgeEvent>,
}

struct Invocation {
    provider: ProviderId,
    raw: RawProviderResult,
    fallback: Option<FallbackInfo>,
}

/// Runs one chat request through validation, provider selection, invocation with at most one
/// fallback, normalization and best-effort persistence.
#[derive(Clone)]
pub struct Orchestrator {
    selector: ProviderSelector,
    store: Option<Arc<dyn ConversationStore>>,
    bridge: StreamingBridge,
}

impl Orchestrator {
    pub fn new(
        selector: ProviderSelector,
        store: Option<Arc<dyn ConversationStore>>,
        bridge: StreamingBridge,
    ) -> Self {
        Self {
            selector,
            store,
            bridge,
        }
    }

    pub fn selector(&self) -> &ProviderSelector {
        &self.selector
    }

    pub async fn handle(&self, body: &Value, user: Option<&User>) -> Result<ChatOutcome, OrchestratorError> {
        let mut run = Run::start();
        let request = ProviderRequest::from_chat_body(body).map_err(|e| run.fail(e.into()))?;

        run.advance(Stage::Selecting);
        let primary = self.selector.select(request.provider).map_err(|e| run.fail(e.into()))?;

        let invocation = self
            .invoke_with_fallback(&mut run, &request, primary, InvokeMode::Json)
            .await
            .map_err(|e| run.fail(e))?;

        let elapsed = run.elapsed();
        let mut response = normalize::normalize(invocation.raw, &request.preferences, invocation.provider, elapsed);
        if let Some(info) = &invocation.fallback {
            let meta = &mut response.response_metadata;
            meta.fallback_used = true;
            meta.original_provider = Some(info.original_provider);
            meta.original_error = Some(info.original_error.clone());
        }

        let conversation_id = match user {
            Some(user) if self.store.is_some() => {
                run.advance(Stage::Persisting);
                self.persist_exchange(user, &request, invocation.provider, &response).await
            }
            _ => None,
        };

        run.advance(Stage::Done);
        tracing::info!(
            provider = %invocation.provider,
            fallback = invocation.fallback.is_some(),
            cards = response.recommended_cards.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "chat request completed"
        );

        Ok(ChatOutcome {
            response,
            provider_used: invocation.provider,
            fallback: invocation.fallback,
            elapsed,
            conversation_id,
        })
    }

    /// Like [`Orchestrator::handle`] but delivers the answer as bridge events. Fallback is only
    /// possible before the first chunk goes out.
    pub async fn handle_stream(&self, body: &Value, user: Option<&User>) -> Result<StreamOutcome, OrchestratorError> {
        let mut run = Run::start();
        let request = ProviderRequest::from_chat_body(body).map_err(|e| run.fail(e.into()))?;

        run.advance(Stage::Selecting);
        let primary = self.selector.select(request.provider).map_err(|e| run.fail(e.into()))?;

        let invocation = self
            .invoke_with_fallback(&mut run, &request, primary, InvokeMode::Stream)
            .await
            .map_err(|e| run.fail(e))?;
        let elapsed = run.elapsed();

        let mut conversation = None;
        if let (Some(user), Some(store)) = (user, &self.store) {
            run.advance(Stage::Persisting);
            conversation = self
                .start_conversation(store.as_ref(), user, &request, invocation.provider)
                .await
                .map(|id| (store.clone(), user.id.clone(), id));
        }
        let conversation_id = conversation.as_ref().map(|(_, _, id)| id.clone());

        let hook = completion_hook(request, invocation.provider, elapsed, conversation);
        run.advance(Stage::Streaming);
        let events = self.bridge.bridge(BridgeSource::from(invocation.raw), Some(hook));

        Ok(StreamOutcome {
            provider_used: invocation.provider,
            fallback: invocation.fallback,
            elapsed,
            conversation_id,
            events,
        })
    }

    async fn invoke_with_fallback(
        &self,
        run: &mut Run,
        request: &ProviderRequest,
        primary: ProviderId,
        mode: InvokeMode,
    ) -> Result<Invocation, OrchestratorError> {
        run.advance(Stage::Invoking(Attempt::Primary));
        let primary_err = match self.attempt(primary, request, mode).await {
            Ok(raw) => {
                return Ok(Invocation {
                    provider: primary,
                    raw,
                    fallback: None,
                })
            }
            Err(err) => err,
        };

        if !primary_err.is_retryable() {
            log_terminal_failure(&primary_err);
            return Err(OrchestratorError::ProviderFailed(primary_err));
        }
        let Some(alternate) = self.selector.alternate(primary) else {
            tracing::warn!(provider = %primary, error = %primary_err, "provider failed and no alternate is available");
            return Err(OrchestratorError::ProviderFailed(primary_err));
        };

        tracing::warn!(
            from = %primary,
            to = %alternate,
            kind = %primary_err.kind,
            error = %primary_err,
            "falling back to alternate provider"
        );
        run.advance(Stage::Invoking(Attempt::Fallback));
        match self.attempt(alternate, request, mode).await {
            Ok(raw) => Ok(Invocation {
                provider: alternate,
                raw,
                fallback: Some(FallbackInfo {
                    original_provider: primary,
                    original_error: primary_err.message,
                }),
            }),
            Err(fallback_err) => {
                tracing::error!(
                    primary = %primary,
                    primary_error = %primary_err,
                    fallback = %alternate,
                    fallback_error = %fallback_err,
                    "all providers failed"
                );
                Err(OrchestratorError::Exhausted {
                    primary: primary_err,
                    fallback: fallback_err,
                })
            }
        }
    }

    /// One provider call. In JSON mode a native stream is drained here so a mid-body failure still
    /// counts against this attempt. In stream mode an error that arrives before the first token
    /// fails the attempt too.
    async fn attempt(
        &self,
        id: ProviderId,
        request: &ProviderRequest,
        mode: InvokeMode,
    ) -> Result<RawProviderResult, ProviderError> {
        let client = self
            .selector
            .client(id)
            .ok_or_else(|| ProviderError::missing_credential(id))?;
        let started = Instant::now();
        let raw = client.invoke(request, mode).await?;
        let raw = match mode {
            InvokeMode::Json => raw.into_complete().await?,
            InvokeMode::Stream => match raw {
                RawProviderResult::Stream(stream) => RawProviderResult::Stream(first_token(stream).await?),
                other => other,
            },
        };
        tracing::debug!(
            provider = %id,
            shape = ?raw.shape(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "provider answered"
        );
        Ok(raw)
    }

    async fn persist_exchange(
        &self,
        user: &User,
        request: &ProviderRequest,
        provider: ProviderId,
        response: &RecommendationResponse,
    ) -> Option<String> {
        let store = self.store.as_ref()?;
        let conversation_id = self.start_conversation(store.as_ref(), user, request, provider).await?;

        let metadata = match serde_json::to_value(response) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize response for persistence");
                Value::Null
            }
        };
        let message = NewMessage::assistant(response.summary.clone(), provider, metadata);
        if let Err(err) = store.add_message(&user.id, &conversation_id, message).await {
            tracing::warn!(user_id = %user.id, %conversation_id, error = %err, "failed to persist assistant message");
        }
        Some(conversation_id)
    }

    /// Reuses the caller's conversation or opens a new one, then records the user's message.
    /// `None` when persistence failed.
    async fn start_conversation(
        &self,
        store: &dyn ConversationStore,
        user: &User,
        request: &ProviderRequest,
        provider: ProviderId,
    ) -> Option<String> {
        let conversation_id = match &request.conversation_id {
            Some(id) => id.clone(),
            None => {
                let metadata = ConversationMetadata::from_first_message(&request.message, provider);
                match store.create_conversation(&user.id, metadata).await {
                    Ok(id) => id,
                    Err(err) => {
                        tracing::warn!(user_id = %user.id, error = %err, "failed to create conversation");
                        return None;
                    }
                }
            }
        };

        let message = NewMessage::user(request.message.clone(), json!({ "preferences": request.preferences }));
        match store.add_message(&user.id, &conversation_id, message).await {
            Ok(()) => Some(conversation_id),
            Err(err) => {
                tracing::warn!(user_id = %user.id, %conversation_id, error = %err, "failed to persist user message");
                None
            }
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("selector", &self.selector)
            .field("persistence", &self.store.is_some())
            .field("bridge", &self.bridge)
            .finish()
    }
}

fn log_terminal_failure(err: &ProviderError) {
    match err.kind {
        FailureKind::AuthFailure | FailureKind::InvalidRequest => {
            tracing::error!(provider = %err.provider, kind = %err.kind, error = %err, "provider rejected request");
        }
        _ => tracing::warn!(provider = %err.provider, kind = %err.kind, error = %err, "provider failed"),
    }
}

/// Waits for the first non-empty token and puts it back in front of the rest.
async fn first_token(mut stream: TextStream) -> Result<TextStream, ProviderError> {
    while let Some(item) = stream.next().await {
        let token = item?;
        if !token.is_empty() {
            return Ok(Box::pin(futures::stream::once(futures::future::ready(Ok(token))).chain(stream)));
        }
    }
    Ok(Box::pin(futures::stream::empty()))
}

/// Extracts cards from the streamed text and records the assistant message once the stream ends.
fn completion_hook(
    request: ProviderRequest,
    provider: ProviderId,
    elapsed: Duration,
    conversation: Option<(Arc<dyn ConversationStore>, String, String)>,
) -> CompletionHook {
    Box::new(move |text: String| {
        async move {
            tracing::debug!(from = ?Stage::Streaming, to = ?Stage::Done, %provider, "orchestrator transition");
            let response = normalize::normalize_text(&text, &request.preferences, provider, elapsed);
            if let Some((store, user_id, conversation_id)) = conversation {
                let metadata = json!({ "recommendedCards": response.recommended_cards, "streamed": true });
                let message = NewMessage::assistant(text, provider, metadata);
                if let Err(err) = store.add_message(&user_id, &conversation_id, message).await {
                    tracing::warn!(%user_id, %conversation_id, error = %err, "failed to persist streamed answer");
                }
            }
            Some(response.recommended_cards)
        }
        .boxed()
    })
}
