use crate::domain::preferences::UserPreferences;
use crate::domain::recommendation::{
    rerank, AnnualFee, AprRange, CardRecommendation, RecommendationResponse, ResponseMetadata,
    RewardCategory, Rewards, SearchMetadata, UserAnalysis, Verification, UNKNOWN,
};
use anyhow::{ensure, Context};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const MAX_OVERALL_SCORE: f64 = 10.0;
pub const MAX_MATCH_SCORE: f64 = 100.0;
pub const MAX_CONFIDENCE: f64 = 10.0;

/// Recommendation payload as produced by a model. Every field is optional and a field of the
/// wrong type (including `null`) reads as absent; conversion into [`RecommendationResponse`]
/// fills gaps and enforces ranges.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmRecommendationPayload {
    #[serde(deserialize_with = "lenient")]
    pub success: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub summary: Option<String>,
    pub search_metadata: Option<Value>,
    #[serde(deserialize_with = "lenient")]
    pub recommended_cards: Vec<Value>,
    #[serde(deserialize_with = "lenient")]
    pub alternative_cards: Vec<Value>,
    pub user_analysis: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LlmCard {
    rank: Value,
    #[serde(alias = "name", deserialize_with = "lenient")]
    card_name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    issuer: Option<String>,
    overall_score: Value,
    match_score: Value,
    annual_fee: Value,
    apr_range: Value,
    rewards: Value,
    #[serde(alias = "verification")]
    verification_details: Value,
}

/// Falls back to `T::default()` when the value does not have the expected shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl LlmRecommendationPayload {
    /// True when a JSON object carries at least one of the fields that identify a recommendation
    /// payload. Arbitrary JSON found inside prose does not qualify.
    pub fn looks_like_recommendation(value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|o| o.contains_key("recommendedCards") || o.contains_key("summary"))
    }

    pub fn from_value(value: Value) -> anyhow::Result<Self> {
        ensure!(
            Self::looks_like_recommendation(&value),
            "JSON object has neither summary nor recommendedCards"
        );
        serde_json::from_value::<Self>(value)
            .context("failed to decode recommendation payload")
    }

    pub fn into_response(
        self,
        preferences: &UserPreferences,
        metadata: ResponseMetadata,
    ) -> RecommendationResponse {
        let recommended_cards = convert_cards(self.recommended_cards);
        let alternative_cards = convert_cards(self.alternative_cards);

        let summary = self
            .summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());

        let search_metadata = self
            .search_metadata
            .as_ref()
            .map(convert_search_metadata)
            .unwrap_or_else(|| empty_search_metadata(Vec::new()));

        let user_analysis = self
            .user_analysis
            .as_ref()
            .map(|v| convert_user_analysis(v, preferences))
            .unwrap_or_else(|| user_analysis_from_preferences(preferences));

        RecommendationResponse {
            success: self.success.unwrap_or(true),
            summary,
            search_metadata,
            recommended_cards,
            alternative_cards,
            user_analysis,
            response_metadata: metadata,
        }
    }
}

fn convert_cards(raw: Vec<Value>) -> Vec<CardRecommendation> {
    let mut ranked: Vec<(Option<f64>, CardRecommendation)> = Vec::with_capacity(raw.len());
    for value in raw {
        let card = match serde_json::from_value::<LlmCard>(value) {
            Ok(card) => card,
            Err(err) => {
                tracing::debug!(error = %err, "dropping undecodable card entry");
                continue;
            }
        };
        let rank = number(&card.rank).filter(|r| *r >= 1.0);
        if let Some(converted) = convert_card(card) {
            ranked.push((rank, converted));
        }
    }

    // Stable: cards keep their emitted order among equal or missing ranks.
    ranked.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let mut cards: Vec<CardRecommendation> = ranked.into_iter().map(|(_, c)| c).collect();
    rerank(&mut cards);
    cards
}

fn convert_card(card: LlmCard) -> Option<CardRecommendation> {
    let card_name = card.card_name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
    let issuer = non_blank(card.issuer).unwrap_or_else(|| UNKNOWN.to_string());

    let overall_score = number(&card.overall_score)
        .map(|s| s.clamp(0.0, MAX_OVERALL_SCORE))
        .unwrap_or(5.0);
    let match_score = number(&card.match_score)
        .map(|s| s.clamp(0.0, MAX_MATCH_SCORE))
        .unwrap_or(50.0);

    Some(CardRecommendation {
        rank: 0,
        card_name,
        issuer,
        overall_score,
        match_score,
        annual_fee: convert_annual_fee(&card.annual_fee),
        apr_range: convert_apr(&card.apr_range),
        rewards: convert_rewards(&card.rewards),
        verification_details: convert_verification(&card.verification_details),
    })
}

fn convert_annual_fee(v: &Value) -> AnnualFee {
    match v {
        Value::Object(o) => AnnualFee {
            amount: o.get("amount").and_then(number).unwrap_or(0.0).max(0.0),
            waived: o.get("waived").and_then(Value::as_bool).unwrap_or(false),
        },
        Value::String(s) => {
            let lower = s.to_lowercase();
            let amount = if lower.contains("no annual fee") || lower.trim() == "none" {
                0.0
            } else {
                first_number(s).unwrap_or(0.0)
            };
            AnnualFee {
                amount: amount.max(0.0),
                waived: lower.contains("waived") || lower.contains("first year"),
            }
        }
        other => AnnualFee {
            amount: number(other).unwrap_or(0.0).max(0.0),
            waived: false,
        },
    }
}

fn convert_apr(v: &Value) -> AprRange {
    let purchase = match v {
        Value::Object(o) => o.get("purchase").and_then(Value::as_str).map(str::to_string),
        Value::String(s) => Some(s.clone()),
        _ => None,
    };
    AprRange {
        purchase: non_blank(purchase).unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

fn convert_rewards(v: &Value) -> Rewards {
    let Value::Object(o) = v else {
        return Rewards::default();
    };

    let categories = o
        .get("categories")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| {
                    let category = non_blank(c.get("category").and_then(Value::as_str).map(str::to_string))?;
                    Some(RewardCategory {
                        category,
                        rate: c.get("rate").and_then(number).unwrap_or(0.0).max(0.0),
                        cap: c
                            .get("cap")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .and_then(|s| non_blank(Some(s)))
                            .unwrap_or_else(|| "None".to_string()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Rewards {
        structure: non_blank(o.get("structure").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| UNKNOWN.to_string()),
        categories,
        base_rate: o.get("baseRate").and_then(number).unwrap_or(0.0).max(0.0),
        estimated_annual_value: o
            .get("estimatedAnnualValue")
            .and_then(number)
            .unwrap_or(0.0)
            .max(0.0),
    }
}

fn convert_verification(v: &Value) -> Verification {
    let Value::Object(o) = v else {
        return Verification::default();
    };
    let confidence_score = o
        .get("confidenceScore")
        .and_then(number)
        .map(|c| c.clamp(0.0, MAX_CONFIDENCE))
        .unwrap_or(5.0);
    Verification {
        confidence_score,
        sources: string_list(o.get("sources")),
        last_verified: non_blank(o.get("lastVerified").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| UNKNOWN.to_string()),
        data_quality: non_blank(o.get("dataQuality").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| quality_tag(confidence_score).to_string()),
    }
}

fn convert_search_metadata(v: &Value) -> SearchMetadata {
    let mut out = empty_search_metadata(string_list(v.get("sourcesConsulted")));
    if let Some(n) = v.get("totalSearches").and_then(number) {
        out.total_searches = n.max(0.0) as u32;
    }
    if let Some(s) = non_blank(v.get("dataFreshness").and_then(Value::as_str).map(str::to_string)) {
        out.data_freshness = s;
    }
    if let Some(s) = non_blank(v.get("lastUpdated").and_then(Value::as_str).map(str::to_string)) {
        out.last_updated = s;
    }
    out
}

fn convert_user_analysis(v: &Value, preferences: &UserPreferences) -> UserAnalysis {
    let derived = user_analysis_from_preferences(preferences);
    UserAnalysis {
        credit_profile: non_blank(v.get("creditProfile").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(derived.credit_profile),
        spending_pattern: non_blank(
            v.get("spendingPattern").and_then(Value::as_str).map(str::to_string),
        )
        .unwrap_or(derived.spending_pattern),
        recommendations: string_list(v.get("recommendations")),
    }
}

pub fn empty_search_metadata(sources: Vec<String>) -> SearchMetadata {
    SearchMetadata {
        total_searches: 0,
        sources_consulted: sources,
        data_freshness: "unknown".to_string(),
        last_updated: chrono::Utc::now().date_naive().to_string(),
    }
}

pub fn user_analysis_from_preferences(preferences: &UserPreferences) -> UserAnalysis {
    let credit_profile = match (preferences.credit_tier, preferences.credit_score) {
        (Some(tier), Some(score)) => format!("{tier} ({score})"),
        (Some(tier), None) => tier.to_string(),
        _ => UNKNOWN.to_string(),
    };
    let names: Vec<&str> = preferences.category_names().collect();
    let spending_pattern = if names.is_empty() {
        "Not analyzed".to_string()
    } else {
        format!("Focused on {}", names.join(", "))
    };
    UserAnalysis {
        credit_profile,
        spending_pattern,
        recommendations: Vec::new(),
    }
}

pub fn quality_tag(confidence: f64) -> &'static str {
    if confidence >= 8.0 {
        "high"
    } else if confidence >= 5.0 {
        "medium"
    } else {
        "low"
    }
}

/// Numbers may arrive as JSON numbers or as strings such as "$95" or "3.5%".
fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => first_number(s),
        _ => None,
    }
}

fn first_number(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| *c != ',').collect();
    let start = cleaned.find(|c: char| c.is_ascii_digit())?;
    let digits: String = cleaned[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.trim_end_matches('.').parse::<f64>().ok()
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
