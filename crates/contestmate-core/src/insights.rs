//! Cached AI insight panels: competition recommendations, skill analysis and
//! competition trends.

use std::sync::Arc;

use contestmate_cache::{CacheError, CacheKey, CacheLayer, Namespace};
use contestmate_schema::{
    CategoryTrend, Competition, InsightsService, RecommendationFilter, RecommendationSet,
    SkillAnalysis, SkillAnalysisSnapshot, TrendsReport, TrendsRequest, TrendsUserInfo,
    UserProfile,
};
use tracing::{info, warn};

pub const SKILL_ANALYSIS_UNAVAILABLE: &str = "Skill analysis service is temporarily unavailable.";
pub const NO_SKILL_ANALYSIS: &str = "No analysis available yet.";
pub const TRENDS_UNAVAILABLE: &str =
    "Trend analysis service is temporarily unavailable; showing default data.";
pub const DEFAULT_TRENDS_SUMMARY: &str = "Competition activity keeps growing across categories. \
     Here is a trend analysis based on your major and competition history.";

/// Competitions picked for the trends panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrendsSelection {
    pub participated: Option<i64>,
    pub available: Option<i64>,
}

pub struct InsightsLoader {
    service: Arc<dyn InsightsService>,
    cache: Arc<CacheLayer>,
}

impl InsightsLoader {
    pub fn new(service: Arc<dyn InsightsService>, cache: Arc<CacheLayer>) -> Self {
        Self { service, cache }
    }

    /// Recommendations for `filter`, cached for a day per filter combination.
    pub async fn recommendations(
        &self,
        user: &UserProfile,
        filter: &RecommendationFilter,
        force_refresh: bool,
    ) -> Result<RecommendationSet, CacheError> {
        let key = CacheKey::recommendations(user.id, &filter.category, &filter.difficulty);
        let service = Arc::clone(&self.service);
        let profile = user.clone();
        let filter = filter.clone();
        let fetch = move || async move {
            let competitions = service.recommendations(profile.id, &filter).await?;
            let competitions: Vec<Competition> = competitions
                .into_iter()
                .map(|c| fill_recommendation_defaults(c, &profile))
                .collect();
            let summary = recommendation_summary(&profile, &filter, competitions.len());
            info!(user = %profile.id, count = competitions.len(), "fetched recommendations");
            Ok::<_, anyhow::Error>(RecommendationSet {
                competitions,
                summary,
            })
        };

        self.load(&key, force_refresh, fetch).await
    }

    /// Skill analysis, cached for a week. A failed analysis yields a
    /// placeholder that is not cached.
    pub async fn skill_analysis(&self, user: &UserProfile, force_refresh: bool) -> SkillAnalysisSnapshot {
        let key = CacheKey::skill_analysis(user.id);
        let previous = self
            .cache
            .get::<SkillAnalysisSnapshot>(&key)
            .map(|s| s.count)
            .unwrap_or(0);
        let service = Arc::clone(&self.service);
        let user_id = user.id;
        let fetch = move || async move {
            let response = service.analyze_skills(user_id).await?;
            Ok::<_, anyhow::Error>(SkillAnalysisSnapshot {
                analysis: SkillAnalysis {
                    skills: response.skill_scores,
                    advice: response
                        .ai_analysis
                        .filter(|a| !a.trim().is_empty())
                        .unwrap_or_else(|| NO_SKILL_ANALYSIS.to_owned()),
                    overall_score: response.overall_score.unwrap_or(0.0),
                },
                count: previous + 1,
            })
        };

        match self.load(&key, force_refresh, fetch).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(user = %user.id, %error, "skill analysis failed");
                SkillAnalysisSnapshot {
                    analysis: SkillAnalysis {
                        skills: Default::default(),
                        advice: SKILL_ANALYSIS_UNAVAILABLE.to_owned(),
                        overall_score: 0.0,
                    },
                    count: previous,
                }
            }
        }
    }

    /// Trends for the selected competitions, cached for a week per
    /// selection. A failed request yields the baseline figures, uncached.
    pub async fn trends(
        &self,
        user: &UserProfile,
        selection: TrendsSelection,
        force_refresh: bool,
    ) -> TrendsReport {
        let key = CacheKey::competition_trends(user.id, selection.participated, selection.available);
        let service = Arc::clone(&self.service);
        let request = TrendsRequest {
            user_id: user.id,
            participated_competition_id: selection.participated,
            available_competition_id: selection.available,
            user_info: Some(TrendsUserInfo {
                major: user.major.clone(),
                skills: Vec::new(),
                experience: "beginner".to_owned(),
            }),
        };
        let fetch = move || async move {
            let response = service.trends(&request).await?;
            Ok::<_, anyhow::Error>(TrendsReport {
                hot_categories: response
                    .hot_categories
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(CategoryTrend::baseline),
                summary: response
                    .ai_analysis
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_TRENDS_SUMMARY.to_owned()),
            })
        };

        match self.load(&key, force_refresh, fetch).await {
            Ok(report) => report,
            Err(error) => {
                warn!(user = %user.id, %error, "trend analysis failed");
                TrendsReport {
                    hot_categories: CategoryTrend::baseline(),
                    summary: TRENDS_UNAVAILABLE.to_owned(),
                }
            }
        }
    }

    async fn load<T, F, Fut>(&self, key: &CacheKey, force_refresh: bool, fetch: F) -> Result<T, CacheError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let ttl = key.namespace().ttl();
        if force_refresh {
            self.cache.refresh(key, ttl, fetch).await
        } else {
            self.cache.get_or_fetch(key, ttl, fetch).await
        }
    }
}

/// Drops every cached insight of every user.
pub fn clear_insights(cache: &CacheLayer) -> Result<usize, CacheError> {
    let mut removed = 0;
    for namespace in [
        Namespace::Recommendations,
        Namespace::SkillAnalysis,
        Namespace::CompetitionTrends,
    ] {
        removed += cache.invalidate_namespace(namespace)?;
    }
    Ok(removed)
}

fn fill_recommendation_defaults(mut competition: Competition, user: &UserProfile) -> Competition {
    if competition.score.is_none() {
        competition.score = Some(70 + competition.id.rem_euclid(30) as u32);
    }
    if competition.suggestions.as_deref().map_or(true, |s| s.trim().is_empty()) {
        let major = user.major.as_deref().unwrap_or("academic");
        let category = competition.category.as_deref().unwrap_or("");
        let category = if category.is_empty() {
            String::new()
        } else {
            format!("{category} ")
        };
        competition.suggestions = Some(format!(
            "Given your {major} background and skills, this {category}competition is a good fit for you."
        ));
    }
    competition
}

fn recommendation_summary(user: &UserProfile, filter: &RecommendationFilter, count: usize) -> String {
    let category = filter.category.trim();
    let difficulty = filter.difficulty.trim();

    if count == 0 {
        let mut text = String::from("Sorry, no recommended competitions match your filters.");
        match (category.is_empty(), difficulty.is_empty()) {
            (true, true) => text.push_str(" Please try different filters."),
            (false, true) => text.push_str(&format!(
                " The category \"{category}\" may have no matching competitions. Please try other filters."
            )),
            (true, false) => text.push_str(&format!(
                " The difficulty \"{difficulty}\" may have no matching competitions. Please try other filters."
            )),
            (false, false) => text.push_str(&format!(
                " The category \"{category}\" and difficulty \"{difficulty}\" may have no matching competitions. Please try other filters."
            )),
        }
        return text;
    }

    let major = user.major.as_deref().unwrap_or("unknown");
    let mut text = format!("Based on your major ({major}) and skill level");
    if !category.is_empty() {
        text.push_str(&format!(", in the {category} category"));
    }
    if !difficulty.is_empty() {
        text.push_str(&format!(", at {difficulty} difficulty"));
    }
    text.push_str(&format!(", we picked {count} competitions for you."));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use contestmate_cache::{ManualClock, MemoryKvStore};
    use contestmate_schema::{SkillAnalysisResponse, TrendsResponse, UserId};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeInsights {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeInsights {
        fn check(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("ai service down"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl InsightsService for FakeInsights {
        async fn recommendations(
            &self,
            _user: UserId,
            filter: &RecommendationFilter,
        ) -> Result<Vec<Competition>> {
            self.check()?;
            if filter.category == "none" {
                return Ok(Vec::new());
            }
            Ok(vec![Competition {
                id: 12,
                title: format!("{} cup", filter.category),
                category: Some(filter.category.clone()),
                difficulty: Some(filter.difficulty.clone()),
                organizer: None,
                tags: None,
                description: None,
                score: None,
                suggestions: None,
            }])
        }

        async fn analyze_skills(&self, _user: UserId) -> Result<SkillAnalysisResponse> {
            self.check()?;
            Ok(serde_json::from_value(serde_json::json!({
                "skillScores": "{\"algorithms\": 81}",
                "aiAnalysis": "Keep practicing dynamic programming.",
                "overallScore": 78
            }))?)
        }

        async fn trends(&self, _request: &TrendsRequest) -> Result<TrendsResponse> {
            self.check()?;
            Ok(TrendsResponse {
                ai_analysis: Some("AI contests are booming.".into()),
                hot_categories: None,
            })
        }
    }

    fn setup() -> (InsightsLoader, Arc<FakeInsights>, Arc<CacheLayer>) {
        let service = Arc::new(FakeInsights::default());
        let cache = Arc::new(CacheLayer::with_clock(
            Arc::new(MemoryKvStore::new()),
            Arc::new(ManualClock::default()),
        ));
        (InsightsLoader::new(service.clone(), cache.clone()), service, cache)
    }

    fn user() -> UserProfile {
        UserProfile::new(42).with_major("Computer Science")
    }

    #[tokio::test]
    async fn recommendations_are_cached_per_filter() {
        let (loader, service, _) = setup();
        let math = RecommendationFilter::new("math", "hard");
        let design = RecommendationFilter::new("design", "");

        let first = loader.recommendations(&user(), &math, false).await.unwrap();
        let again = loader.recommendations(&user(), &math, false).await.unwrap();
        let other = loader.recommendations(&user(), &design, false).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(other.competitions[0].title, "design cup");
        assert_eq!(
            first.summary,
            "Based on your major (Computer Science) and skill level, in the math category, at hard difficulty, we picked 1 competitions for you."
        );
        assert_eq!(first.competitions[0].score, Some(82));
        assert!(first.competitions[0]
            .suggestions
            .as_deref()
            .unwrap()
            .contains("Computer Science"));

        loader.recommendations(&user(), &math, true).await.unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_recommendations_explain_the_filter() {
        let (loader, _, _) = setup();
        let set = loader
            .recommendations(&user(), &RecommendationFilter::new("none", ""), false)
            .await
            .unwrap();
        assert!(set.competitions.is_empty());
        assert!(set.summary.contains("\"none\""));
    }

    #[tokio::test]
    async fn skill_analysis_counts_runs_and_degrades() {
        let (loader, service, cache) = setup();

        let first = loader.skill_analysis(&user(), true).await;
        assert_eq!(first.count, 1);
        assert_eq!(first.analysis.skills.get("algorithms"), Some(&81.0));
        assert_eq!(first.analysis.overall_score, 78.0);

        let cached = loader.skill_analysis(&user(), false).await;
        assert_eq!(cached, first);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);

        let second = loader.skill_analysis(&user(), true).await;
        assert_eq!(second.count, 2);

        service.fail.store(true, Ordering::SeqCst);
        let degraded = loader.skill_analysis(&user(), true).await;
        assert_eq!(degraded.analysis.advice, SKILL_ANALYSIS_UNAVAILABLE);
        assert_eq!(degraded.count, 2);
        // the placeholder never replaces the cached analysis
        let key = CacheKey::skill_analysis(UserId(42));
        assert_eq!(cache.get::<SkillAnalysisSnapshot>(&key), Some(second));
    }

    #[tokio::test]
    async fn trends_fill_baseline_and_fall_back() {
        let (loader, service, _) = setup();
        let selection = TrendsSelection {
            participated: Some(3),
            available: None,
        };

        let report = loader.trends(&user(), selection, false).await;
        assert_eq!(report.summary, "AI contests are booming.");
        assert_eq!(report.hot_categories, CategoryTrend::baseline());

        service.fail.store(true, Ordering::SeqCst);
        let cached = loader.trends(&user(), selection, false).await;
        assert_eq!(cached, report);

        let fallback = loader.trends(&user(), TrendsSelection::default(), false).await;
        assert_eq!(fallback.summary, TRENDS_UNAVAILABLE);
    }

    #[tokio::test]
    async fn clearing_insights_spares_other_keys() {
        let (loader, _, cache) = setup();
        loader
            .recommendations(&user(), &RecommendationFilter::default(), false)
            .await
            .unwrap();
        loader.skill_analysis(&user(), false).await;
        cache.store().set("user", "{}").unwrap();

        assert_eq!(clear_insights(&cache).unwrap(), 2);
        assert!(cache.store().get("user").unwrap().is_some());
    }
}
