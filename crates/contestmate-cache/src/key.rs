use std::fmt;
use std::time::Duration;

use contestmate_schema::UserId;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Families of cached artifacts. Each has a fixed key prefix and lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Recommendations,
    SkillAnalysis,
    CompetitionTrends,
    ChatHistory,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Self::Recommendations,
        Self::SkillAnalysis,
        Self::CompetitionTrends,
        Self::ChatHistory,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Recommendations => "ai_recommendations",
            Self::SkillAnalysis => "ai_skill_analysis",
            Self::CompetitionTrends => "ai_competition_trends",
            Self::ChatHistory => "ai_chat_history",
        }
    }

    /// Chat history snapshots are never served back as authoritative; their
    /// lifetime only bounds how long the sweeper keeps them around.
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Recommendations => Duration::from_secs(DAY),
            Self::SkillAnalysis | Self::CompetitionTrends => Duration::from_secs(7 * DAY),
            Self::ChatHistory => Duration::from_secs(30 * DAY),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "recommendations" => Some(Self::Recommendations),
            "skills" | "skill-analysis" => Some(Self::SkillAnalysis),
            "trends" => Some(Self::CompetitionTrends),
            "history" | "chat-history" => Some(Self::ChatHistory),
            _ => None,
        }
    }

    fn owns(&self, key: &str) -> bool {
        key.strip_prefix(self.prefix())
            .is_some_and(|rest| rest.starts_with('_'))
    }
}

/// `{prefix}_{user}[_{part}...]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    key: String,
}

impl CacheKey {
    pub fn new(namespace: Namespace, user: UserId) -> Self {
        Self {
            namespace,
            key: format!("{}_{}", namespace.prefix(), user),
        }
    }

    pub fn part(mut self, value: impl fmt::Display) -> Self {
        self.key.push('_');
        self.key.push_str(&value.to_string());
        self
    }

    /// Optional parts render as `none` when unset.
    pub fn optional_part<T: fmt::Display>(self, value: Option<T>) -> Self {
        match value {
            Some(v) => self.part(v),
            None => self.part("none"),
        }
    }

    pub fn recommendations(user: UserId, category: &str, difficulty: &str) -> Self {
        Self::new(Namespace::Recommendations, user)
            .part(category)
            .part(difficulty)
    }

    pub fn skill_analysis(user: UserId) -> Self {
        Self::new(Namespace::SkillAnalysis, user)
    }

    pub fn competition_trends(
        user: UserId,
        participated: Option<i64>,
        available: Option<i64>,
    ) -> Self {
        Self::new(Namespace::CompetitionTrends, user)
            .optional_part(participated)
            .optional_part(available)
    }

    pub fn chat_history(user: UserId) -> Self {
        Self::new(Namespace::ChatHistory, user)
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

pub(crate) fn key_in_namespace(namespace: Namespace, key: &str) -> bool {
    namespace.owns(key)
}
