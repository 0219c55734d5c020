use crate::domain::preferences::UserPreferences;
use crate::llm::Provider;
use serde_json::{json, Value};

/// Sites the web-search tool may consult for card terms.
pub const FINANCIAL_DOMAINS: &[&str] = &[
    "nerdwallet.com",
    "creditkarma.com",
    "bankrate.com",
    "chase.com",
    "amex.com",
    "discover.com",
    "capitalone.com",
    "citi.com",
    "wellsfargo.com",
    "usbank.com",
    "creditcards.com",
    "wallethub.com",
    "thepointsguy.com",
    "creditwise.com",
    "experian.com",
    "equifax.com",
    "transunion.com",
];

pub const SCHEMA_NAME: &str = "credit_card_recommendations";

pub fn system_prompt(preferences: &UserPreferences, provider: Provider) -> String {
    let prefs_json = if preferences.is_empty() {
        "{}".to_string()
    } else {
        serde_json::to_string_pretty(preferences).unwrap_or_else(|_| "{}".to_string())
    };
    let today = chrono::Utc::now().date_naive();

    [
        "You are a credit card recommendation assistant for US consumers.".to_string(),
        "Use web search on issuer and comparison sites to verify current annual fees, APRs and reward rates before recommending a card.".to_string(),
        format!("Today's date: {today}"),
        format!("User preferences (validated):\n{prefs_json}"),
        "Rank cards by how well they fit the preferences. Prefer cards the user is likely to be approved for given their credit tier.".to_string(),
        "For every card cite the pages you used in verificationDetails.sources and give a confidenceScore between 0 and 10.".to_string(),
        format!("Set responseMetadata.provider to \"{provider}\"."),
        "Output contract: a single JSON object with exactly these keys:".to_string(),
        OUTPUT_SHAPE.to_string(),
        "Return only JSON. No markdown fences, no commentary.".to_string(),
    ]
    .join("\n\n")
}

const OUTPUT_SHAPE: &str = r#"{
  "success": true,
  "summary": "one paragraph",
  "searchMetadata": {"totalSearches": 0, "sourcesConsulted": ["url"], "dataFreshness": "current", "lastUpdated": "YYYY-MM-DD"},
  "recommendedCards": [{
    "rank": 1,
    "cardName": "Card name",
    "issuer": "Issuer",
    "overallScore": 0.0,
    "matchScore": 0,
    "annualFee": {"amount": 0, "waived": false},
    "aprRange": {"purchase": "20.24% - 28.24%"},
    "rewards": {"structure": "text", "categories": [{"category": "dining", "rate": 3.0, "cap": "none"}], "baseRate": 1.0, "estimatedAnnualValue": 0},
    "verificationDetails": {"confidenceScore": 0.0, "sources": ["url"], "lastVerified": "YYYY-MM-DD", "dataQuality": "high"}
  }],
  "userAnalysis": {"creditProfile": "text", "spendingPattern": "text", "recommendations": ["text"]},
  "responseMetadata": {"provider": "name", "processingTime": "text", "timestamp": "ISO-8601"}
}"#;

/// Strict JSON schema for the canonical payload. Every object lists all of its properties as
/// required and forbids extras.
pub fn recommendation_schema() -> Value {
    let card = strict_object(json!({
        "rank": {"type": "integer"},
        "cardName": {"type": "string"},
        "issuer": {"type": "string"},
        "overallScore": {"type": "number"},
        "matchScore": {"type": "number"},
        "annualFee": strict_object(json!({
            "amount": {"type": "number"},
            "waived": {"type": "boolean"},
        })),
        "aprRange": strict_object(json!({
            "purchase": {"type": "string"},
        })),
        "rewards": strict_object(json!({
            "structure": {"type": "string"},
            "categories": {
                "type": "array",
                "items": strict_object(json!({
                    "category": {"type": "string"},
                    "rate": {"type": "number"},
                    "cap": {"type": "string"},
                })),
            },
            "baseRate": {"type": "number"},
            "estimatedAnnualValue": {"type": "number"},
        })),
        "verificationDetails": strict_object(json!({
            "confidenceScore": {"type": "number"},
            "sources": {"type": "array", "items": {"type": "string"}},
            "lastVerified": {"type": "string"},
            "dataQuality": {"type": "string"},
        })),
    }));

    strict_object(json!({
        "success": {"type": "boolean"},
        "summary": {"type": "string"},
        "searchMetadata": strict_object(json!({
            "totalSearches": {"type": "integer"},
            "sourcesConsulted": {"type": "array", "items": {"type": "string"}},
            "dataFreshness": {"type": "string"},
            "lastUpdated": {"type": "string"},
        })),
        "recommendedCards": {"type": "array", "items": card},
        "userAnalysis": strict_object(json!({
            "creditProfile": {"type": "string"},
            "spendingPattern": {"type": "string"},
            "recommendations": {"type": "array", "items": {"type": "string"}},
        })),
        "responseMetadata": strict_object(json!({
            "provider": {"type": "string"},
            "processingTime": {"type": "string"},
            "timestamp": {"type": "string"},
        })),
    }))
}

fn strict_object(properties: Value) -> Value {
    let required: Vec<Value> = properties
        .as_object()
        .map(|o| o.keys().cloned().map(Value::String).collect())
        .unwrap_or_default();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

pub fn search_prompt(query: &str) -> String {
    format!(
        "Search the web for current, accurate information about: {query}\n\n\
Summarize the findings in a few short paragraphs. Include card names, annual fees, APRs and reward rates where available, and list the source URLs you used."
    )
}
