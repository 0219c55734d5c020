//! Heuristic card extraction from prose answers.
//!
//! Card names are located two ways: capitalised word runs ending in "Card" / "Credit Card", and
//! emphasised (`**...**`) spans that name a known issuer or end in "Card". Each card owns the
//! text between its name and the next card's name; fees, APR, reward rates and sources are read
//! from that section.

use crate::domain::contract::{quality_tag, MAX_CONFIDENCE, MAX_MATCH_SCORE, MAX_OVERALL_SCORE};
use crate::domain::preferences::UserPreferences;
use crate::domain::recommendation::{
    rerank, AnnualFee, AprRange, CardRecommendation, RewardCategory, Rewards, Verification, UNKNOWN,
};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

pub const BASE_MATCH_SCORE: f64 = 50.0;
pub const BASE_OVERALL_SCORE: f64 = 5.0;
const TIER_BONUS: (f64, f64) = (20.0, 1.5);
const FEE_BONUS: (f64, f64) = (15.0, 1.0);
const CATEGORY_BONUS: (f64, f64) = (25.0, 2.0);

const BASE_CONFIDENCE: f64 = 5.0;
const OFFICIAL_SOURCE_BONUS: f64 = 3.0;
const MULTI_SOURCE_BONUS: f64 = 1.0;
const STALE_AFTER_DAYS: i64 = 30;

const KNOWN_ISSUERS: &[(&str, &str)] = &[
    ("american express", "American Express"),
    ("amex", "American Express"),
    ("chase", "Chase"),
    ("capital one", "Capital One"),
    ("citi", "Citi"),
    ("bank of america", "Bank of America"),
    ("wells fargo", "Wells Fargo"),
    ("discover", "Discover"),
    ("u.s. bank", "U.S. Bank"),
];

const OFFICIAL_DOMAINS: &[&str] = &[
    "americanexpress.com",
    "amex.com",
    "chase.com",
    "capitalone.com",
    "citi.com",
    "bankofamerica.com",
    "wellsfargo.com",
    "discover.com",
    "usbank.com",
];

const LEADING_STOPWORDS: &[&str] = &[
    "A", "An", "And", "Apply", "Best", "Consider", "For", "Get", "My", "Or", "Our", "The", "This",
    "That", "Top", "Try", "With", "Your",
];

macro_rules! static_regex {
    ($name:ident, $pattern:literal) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect(concat!("invalid pattern: ", $pattern)))
        }
    };
}

static_regex!(card_name_re, r"(?:[A-Z][A-Za-z0-9'&+.®\-]*\s+){1,7}(?:Credit\s+)?Card\b");
static_regex!(emphasis_re, r"\*\*([^*\n]{3,100})\*\*");
static_regex!(annual_fee_re, r"(?i)annual\s+fee[^$\d\n]{0,20}\$?\s*(\d[\d,]*(?:\.\d+)?)");
static_regex!(no_fee_re, r"(?i)no\s+annual\s+fee|annual\s+fee[:\s]*(?:none|free)");
static_regex!(waived_re, r"(?i)waived|first\s+year\s+free|\$0\s+(?:intro(?:ductory)?\s+)?annual\s+fee\s+(?:for\s+)?the\s+first\s+year");
static_regex!(
    apr_after_re,
    r"(?i)APR[^\d\n]{0,30}(\d{1,2}(?:\.\d+)?%(?:\s*(?:-|–|to)\s*\d{1,2}(?:\.\d+)?%)?)"
);
static_regex!(
    apr_before_re,
    r"(?i)(\d{1,2}(?:\.\d+)?%(?:\s*(?:-|–|to)\s*\d{1,2}(?:\.\d+)?%)?)\s*(?:variable\s+|purchase\s+)?APR"
);
static_regex!(
    reward_re,
    r"(?i)(\d+(?:\.\d+)?)\s*(?:x|%)(?:\s+(?:cash\s*back|points|miles))?\s+(?:on|at|for)\s+([A-Za-z][A-Za-z &/-]{1,40})"
);
static_regex!(url_re, r#"https?://[^\s)\]>"'*]+"#);
static_regex!(confidence_re, r"(?i)data\s+confidence[:\s]*(\d+(?:\.\d+)?)");
static_regex!(last_verified_re, r"(?i)last\s+verified[:\s]*(\d{4}-\d{2}-\d{2})");

#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    start: usize,
}

/// Every card found in `text`, in order of first mention, ranked by preference fit.
pub fn extract_cards(text: &str, preferences: &UserPreferences, today: NaiveDate) -> Vec<CardRecommendation> {
    let candidates = find_candidates(text);
    let mut cards = Vec::with_capacity(candidates.len());
    for (idx, candidate) in candidates.iter().enumerate() {
        let end = candidates.get(idx + 1).map(|c| c.start).unwrap_or(text.len());
        let section = &text[candidate.start..end];
        cards.push(build_card(&candidate.name, section, preferences, today));
    }

    // Stable: ties keep extraction order.
    cards.sort_by(|a, b| b.overall_score.total_cmp(&a.overall_score));
    rerank(&mut cards);
    cards
}

/// All distinct source URLs mentioned anywhere in `text`.
pub fn source_urls(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    url_re()
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

fn find_candidates(text: &str) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();
    let mut emphasized: Vec<(usize, usize)> = Vec::new();

    for caps in emphasis_re().captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let label = inner.as_str().trim();
        let is_label = label.ends_with(':') || text[whole.end()..].starts_with(':');
        if is_label {
            continue;
        }
        let name = clean_name(label);
        if name.is_empty() {
            continue;
        }
        if issuer_for(&name).is_some() || ends_with_card(&name) {
            emphasized.push((whole.start(), whole.end()));
            out.push(Candidate {
                name,
                start: whole.start(),
            });
        }
    }

    for m in card_name_re().find_iter(text) {
        if emphasized.iter().any(|(s, e)| m.start() >= *s && m.end() <= *e) {
            continue;
        }
        if let Some(name) = strip_leading_stopwords(m.as_str()) {
            out.push(Candidate {
                name,
                start: m.start(),
            });
        }
    }

    out.sort_by_key(|c| c.start);
    let mut seen = HashSet::new();
    out.retain(|c| seen.insert(c.name.to_lowercase()));
    out
}

fn clean_name(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c.is_whitespace())
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | '!' | '?') || c.is_whitespace());
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn ends_with_card(name: &str) -> bool {
    name.to_lowercase().ends_with("card")
}

/// Drops sentence-leading filler words; `None` when nothing but the "Card" suffix remains.
fn strip_leading_stopwords(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw.split_whitespace().collect();
    let mut start = 0;
    while start < words.len() && LEADING_STOPWORDS.contains(&words[start]) {
        start += 1;
    }
    let words = &words[start..];
    let suffix_len = match words {
        [.., "Credit", "Card"] => 2,
        [.., "Card"] => 1,
        _ => return None,
    };
    if words.len() <= suffix_len {
        return None;
    }
    Some(words.join(" "))
}

fn issuer_for(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    KNOWN_ISSUERS
        .iter()
        .find(|(needle, _)| contains_word(&lower, needle))
        .map(|(_, issuer)| *issuer)
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(idx, _)| {
        let before_ok = haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[idx + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

fn build_card(name: &str, section: &str, preferences: &UserPreferences, today: NaiveDate) -> CardRecommendation {
    let first_line = section.lines().next().unwrap_or_default();
    let issuer = issuer_for(name)
        .or_else(|| issuer_for(first_line))
        .unwrap_or(UNKNOWN)
        .to_string();

    let stated_fee = stated_annual_fee(section);
    let annual_fee = AnnualFee {
        amount: stated_fee.unwrap_or(0.0),
        waived: waived_re().is_match(section),
    };
    let rewards = parse_rewards(section);
    let verification_details = parse_verification(section, today);
    let (match_score, overall_score) = score(section, stated_fee, &rewards, preferences);

    CardRecommendation {
        rank: 0,
        card_name: name.to_string(),
        issuer,
        overall_score,
        match_score,
        annual_fee,
        apr_range: AprRange {
            purchase: parse_apr(section).unwrap_or_else(|| UNKNOWN.to_string()),
        },
        rewards,
        verification_details,
    }
}

/// `None` when the section never states a fee.
fn stated_annual_fee(section: &str) -> Option<f64> {
    if no_fee_re().is_match(section) {
        return Some(0.0);
    }
    annual_fee_re()
        .captures(section)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
}

fn parse_apr(section: &str) -> Option<String> {
    apr_after_re()
        .captures(section)
        .or_else(|| apr_before_re().captures(section))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace('–', "-"))
}

fn parse_rewards(section: &str) -> Rewards {
    let mut categories: Vec<RewardCategory> = Vec::new();
    let mut base_rate: f64 = 0.0;

    for caps in reward_re().captures_iter(section) {
        let (Some(rate), Some(target)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(rate) = rate.as_str().parse::<f64>() else {
            continue;
        };
        let target = trim_category(target.as_str());
        if target.is_empty() {
            continue;
        }
        let is_base = ["everything", "all purchases", "all other purchases", "other purchases", "all other", "everything else"]
            .iter()
            .any(|b| target.starts_with(b));
        if is_base {
            base_rate = base_rate.max(rate);
        } else if !categories.iter().any(|c| c.category == target) {
            categories.push(RewardCategory {
                category: target,
                rate,
                cap: "None".to_string(),
            });
        }
    }

    let structure = match (categories.is_empty(), base_rate > 0.0) {
        (false, _) => "Category bonuses",
        (true, true) => "Flat rate",
        (true, false) => UNKNOWN,
    };

    Rewards {
        structure: structure.to_string(),
        categories,
        base_rate,
        estimated_annual_value: 0.0,
    }
}

fn trim_category(raw: &str) -> String {
    let lower = format!("{} ", raw.trim().to_lowercase());
    let cut = [" and ", " up to", " with ", " when ", " through ", " in "]
        .iter()
        .filter_map(|sep| lower.find(sep))
        .min()
        .unwrap_or(lower.len());
    lower[..cut].trim_end_matches([' ', '-', '/', '&']).trim().to_string()
}

fn parse_verification(section: &str, today: NaiveDate) -> Verification {
    let sources = source_urls(section);

    let explicit = confidence_re()
        .captures(section)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    let confidence_score = match explicit {
        Some(c) => c.clamp(0.0, MAX_CONFIDENCE),
        None => {
            let mut c = BASE_CONFIDENCE;
            if sources.iter().any(|s| is_official_source(s)) {
                c += OFFICIAL_SOURCE_BONUS;
            }
            if sources.len() >= 2 {
                c += MULTI_SOURCE_BONUS;
            }
            c.min(MAX_CONFIDENCE)
        }
    };

    let verified_on = last_verified_re()
        .captures(section)
        .and_then(|c| c.get(1))
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok());

    let stale = verified_on.is_some_and(|d| (today - d).num_days() > STALE_AFTER_DAYS);
    let data_quality = if stale {
        "stale".to_string()
    } else {
        quality_tag(confidence_score).to_string()
    };

    Verification {
        confidence_score,
        sources,
        last_verified: verified_on
            .map(|d| d.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        data_quality,
    }
}

fn is_official_source(url: &str) -> bool {
    let host = url
        .split("://")
        .nth(1)
        .unwrap_or(url)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    OFFICIAL_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

/// Fixed preference-alignment bonuses on top of the base scores.
fn score(section: &str, stated_fee: Option<f64>, rewards: &Rewards, preferences: &UserPreferences) -> (f64, f64) {
    let lower = section.to_lowercase();
    let mut match_score = BASE_MATCH_SCORE;
    let mut overall = BASE_OVERALL_SCORE;
    let mut add = |(m, o): (f64, f64)| {
        match_score += m;
        overall += o;
    };

    if let Some(tier) = preferences.credit_tier {
        if lower.contains(&tier.label().to_lowercase()) {
            add(TIER_BONUS);
        }
    }
    if let (Some(tolerance), Some(fee)) = (preferences.annual_fee_tolerance, stated_fee) {
        if fee <= f64::from(tolerance) {
            add(FEE_BONUS);
        }
    }
    let overlaps = preferences.category_names().any(|name| {
        lower.contains(name) || rewards.categories.iter().any(|c| c.category.contains(name))
    });
    if overlaps {
        add(CATEGORY_BONUS);
    }

    (match_score.min(MAX_MATCH_SCORE), overall.min(MAX_OVERALL_SCORE))
}
