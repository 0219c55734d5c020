use crate::domain::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const CREDIT_SCORE_RANGE: std::ops::RangeInclusive<i64> = 300..=850;
pub const MONTHLY_CATEGORY_AMOUNT_RANGE: std::ops::RangeInclusive<i64> = 0..=100_000;
pub const MONTHLY_SPENDING_RANGE: std::ops::Range<i64> = 1..100_000;
pub const ANNUAL_INCOME_RANGE: std::ops::Range<i64> = 1..10_000_000;
pub const ANNUAL_FEE_TOLERANCE_RANGE: std::ops::RangeInclusive<i64> = 0..=10_000;
const MAX_CATEGORY_NAME_CHARS: usize = 50;

/// Validated, bounded user preferences. Every field is either absent or inside its bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_score: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_tier: Option<CreditTier>,
    /// Category name -> monthly amount (when the client supplied one).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spending_categories: BTreeMap<String, Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_spending: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_income: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_fee_tolerance: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub card_types: BTreeSet<CardType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditTier {
    Poor,
    Fair,
    Good,
    VeryGood,
    Excellent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Cashback,
    Travel,
    Rewards,
    Business,
    Secured,
    Student,
}

impl CreditTier {
    pub fn from_score(score: u16) -> Self {
        match score {
            800.. => CreditTier::Excellent,
            740..=799 => CreditTier::VeryGood,
            670..=739 => CreditTier::Good,
            580..=669 => CreditTier::Fair,
            _ => CreditTier::Poor,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "poor" => Some(CreditTier::Poor),
            "fair" => Some(CreditTier::Fair),
            "good" => Some(CreditTier::Good),
            "verygood" => Some(CreditTier::VeryGood),
            "excellent" => Some(CreditTier::Excellent),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CreditTier::Poor => "Poor",
            CreditTier::Fair => "Fair",
            CreditTier::Good => "Good",
            CreditTier::VeryGood => "Very Good",
            CreditTier::Excellent => "Excellent",
        }
    }
}

impl fmt::Display for CreditTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl CardType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cashback" => Some(CardType::Cashback),
            "travel" => Some(CardType::Travel),
            "rewards" => Some(CardType::Rewards),
            "business" => Some(CardType::Business),
            "secured" => Some(CardType::Secured),
            "student" => Some(CardType::Student),
            _ => None,
        }
    }
}

impl UserPreferences {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.spending_categories.keys().map(String::as_str)
    }
}

/// Normalizes raw client preferences.
///
/// Fields that fail their own type or range check are omitted. Only a non-object input is an
/// error.
pub fn validate(raw: &Value) -> Result<UserPreferences, ValidationError> {
    let Value::Object(obj) = raw else {
        return Err(ValidationError::new("Preferences must be an object"));
    };

    let mut out = UserPreferences::default();

    if let Some(score) = obj
        .get("creditScore")
        .and_then(as_integer)
        .filter(|s| CREDIT_SCORE_RANGE.contains(s))
    {
        let score = score as u16;
        out.credit_score = Some(score);
        out.credit_tier = Some(CreditTier::from_score(score));
    } else if let Some(tier) = obj
        .get("creditTier")
        .and_then(Value::as_str)
        .and_then(CreditTier::parse)
    {
        out.credit_tier = Some(tier);
    }

    if let Some(raw_categories) = obj.get("spendingCategories") {
        out.spending_categories = validate_categories(raw_categories);
    }

    out.monthly_spending = bounded_u32(obj, "monthlySpending", |v| MONTHLY_SPENDING_RANGE.contains(v));
    out.annual_income = bounded_u32(obj, "annualIncome", |v| ANNUAL_INCOME_RANGE.contains(v));
    out.annual_fee_tolerance = bounded_u32(obj, "annualFeeTolerance", |v| {
        ANNUAL_FEE_TOLERANCE_RANGE.contains(v)
    });

    if let Some(Value::Array(types)) = obj.get("cardTypes") {
        out.card_types = types
            .iter()
            .filter_map(Value::as_str)
            .filter_map(CardType::parse)
            .collect();
    }

    Ok(out)
}

fn validate_categories(raw: &Value) -> BTreeMap<String, Option<u32>> {
    let mut out = BTreeMap::new();
    match raw {
        Value::Array(items) => {
            for name in items.iter().filter_map(Value::as_str) {
                if let Some(name) = normalize_category_name(name) {
                    out.entry(name).or_insert(None);
                }
            }
        }
        Value::Object(entries) => {
            for (name, amount) in entries {
                let Some(name) = normalize_category_name(name) else {
                    continue;
                };
                let amount = match amount {
                    Value::Null => None,
                    other => match as_integer(other)
                        .filter(|a| MONTHLY_CATEGORY_AMOUNT_RANGE.contains(a))
                    {
                        Some(a) => Some(a as u32),
                        None => continue,
                    },
                };
                out.insert(name, amount);
            }
        }
        _ => {}
    }
    out
}

fn normalize_category_name(raw: &str) -> Option<String> {
    let name = raw.trim().to_lowercase();
    let len = name.chars().count();
    (1..=MAX_CATEGORY_NAME_CHARS)
        .contains(&len)
        .then_some(name)
}

fn bounded_u32(obj: &Map<String, Value>, key: &str, in_range: impl Fn(&i64) -> bool) -> Option<u32> {
    obj.get(key)
        .and_then(as_integer)
        .filter(|v| in_range(v))
        .map(|v| v as u32)
}

fn as_integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_non_object_input() {
        assert!(validate(&json!("nope")).is_err());
        assert!(validate(&json!([1, 2])).is_err());
        assert!(validate(&Value::Null).is_err());
    }

    #[test]
    fn derives_credit_tier_from_score() {
        let prefs = validate(&json!({"creditScore": "745"})).unwrap();
        assert_eq!(prefs.credit_score, Some(745));
        assert_eq!(prefs.credit_tier, Some(CreditTier::VeryGood));

        assert_eq!(CreditTier::from_score(800), CreditTier::Excellent);
        assert_eq!(CreditTier::from_score(670), CreditTier::Good);
        assert_eq!(CreditTier::from_score(580), CreditTier::Fair);
        assert_eq!(CreditTier::from_score(579), CreditTier::Poor);
    }

    #[test]
    fn drops_out_of_range_fields_instead_of_clamping() {
        let prefs = validate(&json!({
            "creditScore": 900,
            "annualIncome": -5,
            "annualFeeTolerance": 20000,
            "monthlySpending": 100000,
        }))
        .unwrap();
        assert_eq!(prefs, UserPreferences::default());
    }

    #[test]
    fn explicit_tier_used_only_without_valid_score() {
        let prefs = validate(&json!({"creditTier": "very good"})).unwrap();
        assert_eq!(prefs.credit_tier, Some(CreditTier::VeryGood));
        assert_eq!(prefs.credit_score, None);

        let prefs = validate(&json!({"creditScore": 600, "creditTier": "excellent"})).unwrap();
        assert_eq!(prefs.credit_tier, Some(CreditTier::Fair));
    }

    #[test]
    fn accepts_category_list_and_amount_map() {
        let prefs = validate(&json!({"spendingCategories": ["Dining", " groceries ", "", 3]})).unwrap();
        let names: Vec<&str> = prefs.category_names().collect();
        assert_eq!(names, vec!["dining", "groceries"]);

        let prefs = validate(&json!({
            "spendingCategories": {"travel": 800, "gas": -1, "dining": null, "online": "abc"}
        }))
        .unwrap();
        assert_eq!(prefs.spending_categories.get("travel"), Some(&Some(800)));
        assert_eq!(prefs.spending_categories.get("dining"), Some(&None));
        assert!(!prefs.spending_categories.contains_key("gas"));
        assert!(!prefs.spending_categories.contains_key("online"));
    }

    #[test]
    fn filters_unknown_card_types() {
        let prefs = validate(&json!({"cardTypes": ["travel", "platinum", "Travel", "student"]})).unwrap();
        let types: Vec<CardType> = prefs.card_types.iter().copied().collect();
        assert_eq!(types, vec![CardType::Travel, CardType::Student]);
    }

    #[test]
    fn validation_is_a_fixed_point() {
        let raw = json!({
            "creditScore": 712.9,
            "spendingCategories": {"Dining": 400, "groceries": null},
            "monthlySpending": "2500",
            "annualIncome": 85000,
            "annualFeeTolerance": 0,
            "cardTypes": ["cashback", "rewards", "bogus"],
            "unrelated": true,
        });
        let once = validate(&raw).unwrap();
        let twice = validate(&serde_json::to_value(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.credit_score, Some(712));
        assert_eq!(once.annual_fee_tolerance, Some(0));
    }
}
