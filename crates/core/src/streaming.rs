use crate::config::Settings;
use crate::domain::recommendation::CardRecommendation;
use crate::llm::{RawProviderResult, TextStream};
use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_CAPACITY: usize = 16;

/// One client-visible streaming event. A sequence ends with exactly one `Done` or one `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Content(String),
    Cards(Vec<CardRecommendation>),
    Error(String),
    Done,
}

impl BridgeEvent {
    /// Payload of the `data:` field.
    pub fn data(&self) -> String {
        match self {
            BridgeEvent::Content(chunk) => json!({ "content": chunk }).to_string(),
            BridgeEvent::Cards(cards) => json!({ "type": "cards", "cards": cards }).to_string(),
            BridgeEvent::Error(message) => json!({ "error": message }).to_string(),
            BridgeEvent::Done => "[DONE]".to_string(),
        }
    }

    pub fn to_frame(&self) -> String {
        format!("data: {}\n\n", self.data())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeEvent::Done | BridgeEvent::Error(_))
    }
}

pub enum BridgeSource {
    /// A complete answer; chunks are synthesized and paced.
    Text(String),
    /// Native vendor tokens, forwarded as they arrive.
    Tokens(TextStream),
}

impl From<RawProviderResult> for BridgeSource {
    fn from(raw: RawProviderResult) -> Self {
        match raw {
            RawProviderResult::Structured(value) => {
                BridgeSource::Text(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
            }
            RawProviderResult::Text(text) => BridgeSource::Text(text),
            RawProviderResult::Stream(stream) => BridgeSource::Tokens(stream),
        }
    }
}

/// Receives the full emitted text once all content went out. Cards it returns are sent before
/// the terminal `[DONE]`.
pub type CompletionHook =
    Box<dyn FnOnce(String) -> BoxFuture<'static, Option<Vec<CardRecommendation>>> + Send>;

#[derive(Debug, Clone, Copy)]
pub struct StreamingBridge {
    chunk_size: usize,
    chunk_delay: Duration,
    capacity: usize,
}

impl StreamingBridge {
    pub fn new(chunk_size: usize, chunk_delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_delay,
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.stream_chunk_size, settings.stream_chunk_delay)
    }

    /// Splits on character boundaries; concatenating the chunks yields `text`.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_size)
            .map(|c| c.iter().collect())
            .collect()
    }

    /// Spawns the producer task. Dropping the returned stream stops the task and drops the
    /// source, which releases the vendor response.
    pub fn bridge(&self, source: BridgeSource, on_complete: Option<CompletionHook>) -> ReceiverStream<BridgeEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let this = *self;
        tokio::spawn(async move {
            if this.produce(source, on_complete, &tx).await.is_none() {
                tracing::debug!("stream consumer went away; producer stopped");
            }
        });
        ReceiverStream::new(rx)
    }

    /// `None` when the receiver was dropped.
    async fn produce(
        self,
        source: BridgeSource,
        on_complete: Option<CompletionHook>,
        tx: &mpsc::Sender<BridgeEvent>,
    ) -> Option<()> {
        let full_text = match source {
            BridgeSource::Text(text) => {
                let chunks = self.chunk_text(&text);
                let last = chunks.len().saturating_sub(1);
                for (idx, chunk) in chunks.into_iter().enumerate() {
                    tx.send(BridgeEvent::Content(chunk)).await.ok()?;
                    if idx < last && !self.chunk_delay.is_zero() {
                        tokio::time::sleep(self.chunk_delay).await;
                    }
                }
                text
            }
            BridgeSource::Tokens(mut stream) => {
                let mut text = String::new();
                loop {
                    let next = tokio::select! {
                        _ = tx.closed() => return None,
                        item = stream.next() => item,
                    };
                    match next {
                        Some(Ok(token)) => {
                            if token.is_empty() {
                                continue;
                            }
                            text.push_str(&token);
                            tx.send(BridgeEvent::Content(token)).await.ok()?;
                        }
                        Some(Err(err)) => {
                            tracing::warn!(provider = %err.provider, kind = %err.kind, error = %err, "provider stream failed");
                            tx.send(BridgeEvent::Error(err.message)).await.ok()?;
                            return Some(());
                        }
                        None => break,
                    }
                }
                text
            }
        };

        if let Some(hook) = on_complete {
            if let Some(cards) = hook(full_text).await.filter(|c| !c.is_empty()) {
                tx.send(BridgeEvent::Cards(cards)).await.ok()?;
            }
        }
        tx.send(BridgeEvent::Done).await.ok()
    }
}

impl Default for StreamingBridge {
    fn default() -> Self {
        Self::new(50, Duration::from_millis(20))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recommendation::{AnnualFee, AprRange, Rewards, Verification, UNKNOWN};
    use crate::llm::error::{FailureKind, ProviderError};
    use crate::llm::Provider;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn fast(chunk_size: usize) -> StreamingBridge {
        StreamingBridge::new(chunk_size, Duration::ZERO)
    }

    fn contents(events: &[BridgeEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                BridgeEvent::Content(c) => Some(c.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn chunks_on_char_boundaries() {
        let b = fast(2);
        assert_eq!(b.chunk_text("héllo"), vec!["hé", "ll", "o"]);
        assert!(b.chunk_text("").is_empty());
    }

    #[test]
    fn frames_are_sse_data_lines() {
        assert_eq!(BridgeEvent::Content("hi".into()).to_frame(), "data: {\"content\":\"hi\"}\n\n");
        assert_eq!(BridgeEvent::Done.to_frame(), "data: [DONE]\n\n");
        assert_eq!(BridgeEvent::Error("boom".into()).data(), "{\"error\":\"boom\"}");
    }

    #[tokio::test]
    async fn text_round_trips_and_ends_with_one_done() {
        let text: String = (0..123).map(|i| char::from(b'a' + (i % 26) as u8)).collect::<String>() + " ✓";
        let events: Vec<BridgeEvent> = fast(50).bridge(BridgeSource::Text(text.clone()), None).collect().await;

        assert_eq!(contents(&events), text);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events.last(), Some(&BridgeEvent::Done));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn token_failure_ends_with_single_error() {
        let tokens: Vec<Result<String, ProviderError>> = vec![
            Ok("partial ".into()),
            Err(ProviderError::new(Provider::Anthropic, FailureKind::Overloaded, "Overloaded")),
            Ok("never".into()),
        ];
        let source = BridgeSource::Tokens(Box::pin(futures::stream::iter(tokens)));
        let events: Vec<BridgeEvent> = fast(50).bridge(source, None).collect().await;

        assert_eq!(
            events,
            vec![BridgeEvent::Content("partial ".into()), BridgeEvent::Error("Overloaded".into())]
        );
    }

    #[tokio::test]
    async fn completion_cards_precede_done() {
        let card = CardRecommendation {
            rank: 1,
            card_name: "Discover It Card".into(),
            issuer: "Discover".into(),
            overall_score: 5.0,
            match_score: 50.0,
            annual_fee: AnnualFee::default(),
            apr_range: AprRange::default(),
            rewards: Rewards::default(),
            verification_details: Verification::default(),
        };
        assert_eq!(card.apr_range.purchase, UNKNOWN);
        let seen = Arc::new(std::sync::Mutex::new(String::new()));
        let seen_in_hook = seen.clone();
        let hook: CompletionHook = Box::new(move |full| {
            *seen_in_hook.lock().unwrap() = full;
            async move { Some(vec![card]) }.boxed()
        });

        let events: Vec<BridgeEvent> = fast(4).bridge(BridgeSource::Text("abcdefgh".into()), Some(hook)).collect().await;
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[2], BridgeEvent::Cards(c) if c.len() == 1));
        assert_eq!(events[3], BridgeEvent::Done);
        assert_eq!(*seen.lock().unwrap(), "abcdefgh");
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_consumer_releases_source() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(dropped.clone());
        let first: Vec<Result<String, ProviderError>> = vec![Ok("first".into())];
        let tokens = futures::stream::iter(first)
            .chain(futures::stream::pending())
            .map(move |item| {
                let _keep = &guard;
                item
            });

        let mut events = fast(50).bridge(BridgeSource::Tokens(Box::pin(tokens)), None);
        assert_eq!(events.next().await, Some(BridgeEvent::Content("first".into())));
        drop(events);

        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dropped.load(Ordering::SeqCst));
    }
}
