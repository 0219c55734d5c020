use crate::llm::error::{FailureKind, ProviderError};
use crate::llm::{Provider, TextStream};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;

/// Incremental `text/event-stream` decoder. Bytes go in, complete `data:` payloads come out.
/// A frame ends at a blank line; multi-line data is joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if !self.data.is_empty() {
                    out.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
            // event:, id:, retry: and comments are ignored; payloads carry their own type.
        }
        out
    }

    /// Flushes a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buf.is_empty() {
            let line = String::from_utf8_lossy(&self.buf).trim_end().to_string();
            self.buf.clear();
            if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        if self.data.is_empty() {
            None
        } else {
            let joined = self.data.join("\n");
            self.data.clear();
            Some(joined)
        }
    }
}

/// What a vendor payload means for the token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseAction {
    Token(String),
    Skip,
    Stop,
}

struct TokenState<S, F> {
    body: S,
    decoder: SseDecoder,
    parse: F,
    pending: VecDeque<String>,
    finished: bool,
}

/// Adapts a vendor SSE body into a [`TextStream`]. Dropping the stream drops the body.
pub fn token_stream<S, B, F>(provider: Provider, body: S, parse: F) -> TextStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
    F: FnMut(&str) -> Result<SseAction, ProviderError> + Send + 'static,
{
    let state = TokenState {
        body,
        decoder: SseDecoder::new(),
        parse,
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, move |mut st| async move {
        loop {
            if st.finished {
                return None;
            }
            if let Some(payload) = st.pending.pop_front() {
                match (st.parse)(&payload) {
                    Ok(SseAction::Token(t)) if t.is_empty() => continue,
                    Ok(SseAction::Token(t)) => return Some((Ok(t), st)),
                    Ok(SseAction::Skip) => continue,
                    Ok(SseAction::Stop) => {
                        st.finished = true;
                        return None;
                    }
                    Err(err) => {
                        st.finished = true;
                        return Some((Err(err), st));
                    }
                }
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let frames = st.decoder.push(bytes.as_ref());
                    st.pending.extend(frames);
                }
                Some(Err(err)) => {
                    st.finished = true;
                    return Some((Err(ProviderError::transport(provider, &err)), st));
                }
                None => match st.decoder.finish() {
                    Some(frame) => st.pending.push_back(frame),
                    None => {
                        st.finished = true;
                        return None;
                    }
                },
            }
        }
    });
    Box::pin(stream)
}

/// In-band error payloads arrive as `{"type":"error","error":{"type":..,"message":..}}`.
pub(crate) fn in_band_error(provider: Provider, payload: &serde_json::Value, kind: FailureKind) -> ProviderError {
    let message = payload["error"]["message"]
        .as_str()
        .unwrap_or("stream error")
        .to_string();
    ProviderError::new(provider, kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_frames_split_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"event: ping\ndata: {\"a\"").is_empty());
        assert_eq!(d.push(b":1}\n\ndata: two\r\n\r\n"), vec!["{\"a\":1}", "two"]);
        assert!(d.push(b": comment\n\n").is_empty());
    }

    #[test]
    fn joins_multiline_data_and_flushes_tail() {
        let mut d = SseDecoder::new();
        assert_eq!(d.push(b"data: a\ndata: b\n\n"), vec!["a\nb"]);
        assert!(d.push(b"data: tail").is_empty());
        assert_eq!(d.finish(), Some("tail".to_string()));
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn keeps_multibyte_characters_split_between_chunks() {
        let mut d = SseDecoder::new();
        let bytes = "data: café\n\n".as_bytes();
        let split = bytes.len() - 4;
        assert!(d.push(&bytes[..split]).is_empty());
        assert_eq!(d.push(&bytes[split..]), vec!["café"]);
    }

    #[tokio::test]
    async fn token_stream_maps_actions() {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(b"data: skip\n\ndata: tok:Hel".to_vec()),
            Ok(b"\n\ndata: tok:lo\n\ndata: stop\n\ndata: tok:never\n\n".to_vec()),
        ];
        let body = futures::stream::iter(chunks);
        let stream = token_stream(Provider::Anthropic, body, |payload| {
            Ok(match payload {
                "stop" => SseAction::Stop,
                p => match p.strip_prefix("tok:") {
                    Some(t) => SseAction::Token(t.to_string()),
                    None => SseAction::Skip,
                },
            })
        });
        let tokens: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(tokens, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn token_stream_ends_after_error() {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> =
            vec![Ok(b"data: a\n\ndata: boom\n\ndata: b\n\n".to_vec())];
        let stream = token_stream(Provider::Anthropic, futures::stream::iter(chunks), |p| match p {
            "boom" => Err(ProviderError::new(Provider::Anthropic, FailureKind::Overloaded, "boom")),
            other => Ok(SseAction::Token(other.to_string())),
        });
        let items: Vec<Result<String, ProviderError>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("a"));
        assert_eq!(items[1].as_ref().unwrap_err().kind, FailureKind::Overloaded);
    }
}
