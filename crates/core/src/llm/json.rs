use crate::domain::contract::LlmRecommendationPayload;
use anyhow::Context;

/// Contents of the first fenced code block (```json ... ``` or ``` ... ```), if any.
pub fn extract_fenced(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip the info string ("json") up to the end of the line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    let inner = body[..end].trim();
    (!inner.is_empty()).then_some(inner)
}

/// Outermost balanced `{...}` spans in order of appearance. Braces inside JSON strings are
/// ignored.
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth: usize = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if depth > 0 && in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        out.push(&text[s..=idx]);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// First JSON-looking span: a fenced block, else the first outermost balanced object.
pub fn extract_json(text: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced(text) {
        return Some(fenced.to_string());
    }
    balanced_objects(text).first().map(|s| s.trim().to_string())
}

/// Locates a recommendation payload inside free text.
pub fn parse_recommendation(text: &str) -> anyhow::Result<LlmRecommendationPayload> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(fenced) = extract_fenced(text) {
        candidates.extend(balanced_objects(fenced));
    }
    candidates.extend(balanced_objects(text));
    anyhow::ensure!(!candidates.is_empty(), "no JSON object found in provider text");

    let mut last_err: Option<anyhow::Error> = None;
    for candidate in candidates {
        let parsed = serde_json::from_str::<serde_json::Value>(candidate)
            .with_context(|| format!("invalid JSON object ({} bytes)", candidate.len()))
            .and_then(LlmRecommendationPayload::from_value);
        match parsed {
            Ok(payload) => return Ok(payload),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no recommendation payload found")))
}
