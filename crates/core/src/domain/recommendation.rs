use crate::llm::ProviderId;
use serde::{Deserialize, Serialize};

pub const UNKNOWN: &str = "Unknown";

/// Canonical recommendation payload returned to clients regardless of which provider answered
/// or how its output had to be recovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResponse {
    pub success: bool,
    pub summary: String,
    pub search_metadata: SearchMetadata,
    pub recommended_cards: Vec<CardRecommendation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_cards: Vec<CardRecommendation>,
    pub user_analysis: UserAnalysis,
    pub response_metadata: ResponseMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub total_searches: u32,
    pub sources_consulted: Vec<String>,
    pub data_freshness: String,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecommendation {
    pub rank: u32,
    pub card_name: String,
    pub issuer: String,
    pub overall_score: f64,
    pub match_score: f64,
    pub annual_fee: AnnualFee,
    pub apr_range: AprRange,
    pub rewards: Rewards,
    pub verification_details: Verification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualFee {
    pub amount: f64,
    pub waived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AprRange {
    pub purchase: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rewards {
    pub structure: String,
    pub categories: Vec<RewardCategory>,
    pub base_rate: f64,
    pub estimated_annual_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardCategory {
    pub category: String,
    pub rate: f64,
    pub cap: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub confidence_score: f64,
    pub sources: Vec<String>,
    pub last_verified: String,
    pub data_quality: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnalysis {
    pub credit_profile: String,
    pub spending_pattern: String,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub provider: ProviderId,
    pub processing_time: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub provenance: Provenance,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_provider: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

/// How the recommendation was obtained from the provider output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Vendor-side schema-constrained JSON.
    Structured,
    /// JSON object located inside free text.
    BestEffort,
    /// Heuristic card extraction from prose.
    TextExtraction,
}

impl ResponseMetadata {
    pub fn new(provider: ProviderId, elapsed: std::time::Duration, provenance: Provenance) -> Self {
        Self {
            provider,
            processing_time: format_elapsed(elapsed),
            timestamp: chrono::Utc::now(),
            provenance,
            fallback_used: false,
            original_provider: None,
            original_error: None,
            parse_error: None,
        }
    }
}

impl Default for AnnualFee {
    fn default() -> Self {
        Self {
            amount: 0.0,
            waived: false,
        }
    }
}

impl Default for AprRange {
    fn default() -> Self {
        Self {
            purchase: UNKNOWN.to_string(),
        }
    }
}

impl Default for Rewards {
    fn default() -> Self {
        Self {
            structure: UNKNOWN.to_string(),
            categories: Vec::new(),
            base_rate: 0.0,
            estimated_annual_value: 0.0,
        }
    }
}

impl Default for Verification {
    fn default() -> Self {
        Self {
            confidence_score: 5.0,
            sources: Vec::new(),
            last_verified: UNKNOWN.to_string(),
            data_quality: "medium".to_string(),
        }
    }
}

pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    format!("{}ms", elapsed.as_millis())
}

/// Reassigns ranks 1..=N in current list order.
pub fn rerank(cards: &mut [CardRecommendation]) {
    for (idx, card) in cards.iter_mut().enumerate() {
        card.rank = (idx + 1) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn card(name: &str, rank: u32) -> CardRecommendation {
        CardRecommendation {
            rank,
            card_name: name.to_string(),
            issuer: UNKNOWN.to_string(),
            overall_score: 5.0,
            match_score: 50.0,
            annual_fee: AnnualFee::default(),
            apr_range: AprRange::default(),
            rewards: Rewards::default(),
            verification_details: Verification::default(),
        }
    }

    #[test]
    fn rerank_produces_dense_ranks() {
        let mut cards = vec![card("a", 7), card("b", 7), card("c", 2)];
        rerank(&mut cards);
        let ranks: Vec<u32> = cards.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn serializes_camel_case_and_omits_empty_alternatives() {
        let response = RecommendationResponse {
            success: true,
            summary: "s".to_string(),
            search_metadata: SearchMetadata {
                total_searches: 1,
                sources_consulted: vec![],
                data_freshness: "current".to_string(),
                last_updated: "2026-01-01".to_string(),
            },
            recommended_cards: vec![card("Chase Freedom Card", 1)],
            alternative_cards: vec![],
            user_analysis: UserAnalysis {
                credit_profile: UNKNOWN.to_string(),
                spending_pattern: "Not analyzed".to_string(),
                recommendations: vec![],
            },
            response_metadata: ResponseMetadata::new(
                ProviderId::OpenAi,
                Duration::from_millis(42),
                Provenance::Structured,
            ),
        };

        let v = serde_json::to_value(&response).unwrap();
        assert!(v.get("recommendedCards").unwrap().is_array());
        assert!(v.get("alternativeCards").is_none());
        assert_eq!(v["responseMetadata"]["provider"], "openai");
        assert_eq!(v["responseMetadata"]["processingTime"], "42ms");
        assert_eq!(v["responseMetadata"]["provenance"], "structured");
        assert_eq!(v["recommendedCards"][0]["verificationDetails"]["dataQuality"], "medium");
    }
}
