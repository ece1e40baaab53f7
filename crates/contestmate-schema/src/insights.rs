//! Payloads of the AI insight endpoints (recommendations, skill analysis,
//! competition trends) and the shapes cached for them.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::UserId;

/// Recommendation filter. An empty field means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationFilter {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub difficulty: String,
}

impl RecommendationFilter {
    pub fn new(category: impl Into<String>, difficulty: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            difficulty: difficulty.into(),
        }
    }
}

/// Competition as returned by the recommendation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Competition {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub organizer: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub suggestions: Option<String>,
}

/// Cached result of one recommendation query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub competitions: Vec<Competition>,
    pub summary: String,
}

/// Raw answer of the skill analysis endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillAnalysisResponse {
    #[serde(default, deserialize_with = "skill_scores")]
    pub skill_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub ai_analysis: Option<String>,
    #[serde(default)]
    pub overall_score: Option<f64>,
}

/// The backend sometimes sends `skillScores` as a JSON-encoded string.
/// Anything that is neither an object nor a decodable string yields no scores.
fn skill_scores<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    let decoded = match raw {
        serde_json::Value::Null => return Ok(BTreeMap::new()),
        serde_json::Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    };
    Ok(decoded.unwrap_or_else(|error| {
        warn!(%error, "discarding undecodable skill scores");
        BTreeMap::new()
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillAnalysis {
    pub skills: BTreeMap<String, f64>,
    pub advice: String,
    pub overall_score: f64,
}

/// Cached skill analysis plus the number of analyses run so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillAnalysisSnapshot {
    pub analysis: SkillAnalysis,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsUserInfo {
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub experience: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsRequest {
    pub user_id: UserId,
    pub participated_competition_id: Option<i64>,
    pub available_competition_id: Option<i64>,
    pub user_info: Option<TrendsUserInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsResponse {
    #[serde(default)]
    pub ai_analysis: Option<String>,
    #[serde(default)]
    pub hot_categories: Option<Vec<CategoryTrend>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTrend {
    pub name: String,
    pub participation: u32,
    pub growth: i32,
}

impl CategoryTrend {
    fn new(name: &str, participation: u32, growth: i32) -> Self {
        Self {
            name: name.to_owned(),
            participation,
            growth,
        }
    }

    /// Baseline figures shown when the backend has no category breakdown.
    pub fn baseline() -> Vec<Self> {
        vec![
            Self::new("Programming", 85, 15),
            Self::new("Entrepreneurship", 78, 22),
            Self::new("Design", 65, 8),
            Self::new("Mathematical modeling", 72, 12),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsReport {
    pub hot_categories: Vec<CategoryTrend>,
    pub summary: String,
}
