pub mod extract;

use crate::domain::contract::{empty_search_metadata, user_analysis_from_preferences, LlmRecommendationPayload};
use crate::domain::preferences::UserPreferences;
use crate::domain::recommendation::{Provenance, RecommendationResponse, ResponseMetadata};
use crate::llm::{json, ProviderId, RawProviderResult};
use std::time::Duration;

pub const FALLBACK_NOTICE: &str =
    "Structured recommendations were unavailable, so these results were extracted from the assistant's text answer.";
const NO_CARDS_NOTICE: &str = "No specific cards could be identified in the answer.";
const RETRY_HINT: &str = "Please try again with a more specific query";

/// Converts any provider output into the canonical response. Never fails: parse problems
/// degrade to text extraction and are recorded in `responseMetadata.parseError`.
pub fn normalize(
    raw: RawProviderResult,
    preferences: &UserPreferences,
    provider: ProviderId,
    elapsed: Duration,
) -> RecommendationResponse {
    match raw {
        RawProviderResult::Structured(value) => {
            match LlmRecommendationPayload::from_value(value.clone()) {
                Ok(payload) => payload.into_response(
                    preferences,
                    ResponseMetadata::new(provider, elapsed, Provenance::Structured),
                ),
                Err(err) => {
                    tracing::warn!(%provider, error = %err, "structured output did not match the contract");
                    fallback_response(&value.to_string(), preferences, provider, elapsed, format!("{err:#}"))
                }
            }
        }
        RawProviderResult::Text(text) => normalize_text(&text, preferences, provider, elapsed),
        RawProviderResult::Stream(_) => {
            tracing::error!(%provider, "stream result reached the normalizer undrained");
            fallback_response(
                "",
                preferences,
                provider,
                elapsed,
                "stream result was not drained before normalization".to_string(),
            )
        }
    }
}

/// Best-effort JSON first, then heuristic extraction.
pub fn normalize_text(
    text: &str,
    preferences: &UserPreferences,
    provider: ProviderId,
    elapsed: Duration,
) -> RecommendationResponse {
    match json::parse_recommendation(text) {
        Ok(payload) => payload.into_response(
            preferences,
            ResponseMetadata::new(provider, elapsed, Provenance::BestEffort),
        ),
        Err(err) => {
            tracing::debug!(%provider, error = %err, "no recommendation JSON in text; extracting cards");
            fallback_response(text, preferences, provider, elapsed, format!("{err:#}"))
        }
    }
}

fn fallback_response(
    text: &str,
    preferences: &UserPreferences,
    provider: ProviderId,
    elapsed: Duration,
    parse_error: String,
) -> RecommendationResponse {
    let today = chrono::Utc::now().date_naive();
    let recommended_cards = extract::extract_cards(text, preferences, today);

    let mut user_analysis = user_analysis_from_preferences(preferences);
    let summary = if recommended_cards.is_empty() {
        user_analysis.recommendations.push(RETRY_HINT.to_string());
        format!("{FALLBACK_NOTICE} {NO_CARDS_NOTICE}")
    } else {
        format!("{FALLBACK_NOTICE} Found {} card(s).", recommended_cards.len())
    };

    let mut metadata = ResponseMetadata::new(provider, elapsed, Provenance::TextExtraction);
    metadata.parse_error = Some(parse_error);

    RecommendationResponse {
        success: false,
        summary,
        search_metadata: empty_search_metadata(extract::source_urls(text)),
        recommended_cards,
        alternative_cards: Vec::new(),
        user_analysis,
        response_metadata: metadata,
    }
}
