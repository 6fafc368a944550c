//! Improvement recommendations

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BehavioralAnalyzer, DriftReport, Priority};
use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    StyleImprovement,
    FeatureExtraction,
    AlgorithmPerformance,
    DataQuality,
}

impl std::fmt::Display for RecommendationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecommendationCategory::StyleImprovement => "style_improvement",
            RecommendationCategory::FeatureExtraction => "feature_extraction",
            RecommendationCategory::AlgorithmPerformance => "algorithm_performance",
            RecommendationCategory::DataQuality => "data_quality",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub priority: Priority,
    pub issue: String,
    pub description: String,
    pub estimated_impact: String,
    /// Style category the recommendation targets, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_to: Option<String>,
}

impl Recommendation {
    fn new(
        category: RecommendationCategory,
        priority: Priority,
        issue: impl Into<String>,
        description: impl Into<String>,
        estimated_impact: impl Into<String>,
    ) -> Self {
        Self {
            category,
            priority,
            issue: issue.into(),
            description: description.into(),
            estimated_impact: estimated_impact.into(),
            related_to: None,
        }
    }
}

/// Analyses that lack data contribute nothing; anything else is a real failure.
fn optional<T>(name: &str, result: EngineResult<T>) -> EngineResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_insufficient_data() => {
            debug!("Skipping {} recommendations: {}", name, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl BehavioralAnalyzer {
    /// Combine every analysis into a list ordered critical first.
    pub async fn generate_improvement_recommendations(&self) -> EngineResult<Vec<Recommendation>> {
        let mut recommendations = Vec::new();

        let accuracy = optional(
            "accuracy",
            self.analyze_style_assignment_accuracy(self.config.default_window_days).await,
        )?;
        if let Some(report) = accuracy {
            for category in report.underperforming(self.config.min_high_accuracy_rate) {
                let mut rec = Recommendation::new(
                    RecommendationCategory::StyleImprovement,
                    Priority::High,
                    format!("Low accuracy rate: {:.2}", category.high_accuracy_rate),
                    format!(
                        "Review and update feature mappings for the {} style category",
                        category.category
                    ),
                    "Improve user satisfaction by 15-25%",
                );
                rec.related_to = Some(category.category.clone());
                recommendations.push(rec);
            }
        }

        let uploads = optional("upload", self.analyze_user_upload_patterns(None).await)?;
        if let Some(report) = uploads {
            if report.high_alignment_rate < self.config.min_high_alignment_rate {
                recommendations.push(Recommendation::new(
                    RecommendationCategory::FeatureExtraction,
                    Priority::High,
                    format!(
                        "Low feature alignment between quiz and uploads: {:.2}",
                        report.high_alignment_rate
                    ),
                    "Improve computer vision feature extraction accuracy",
                    "Better style assignment accuracy",
                ));
            }
        }

        let drift = optional(
            "drift",
            self.detect_algorithm_drift(self.config.drift_window_days).await,
        )?;
        if let Some(report) = drift {
            recommendations.extend(drift_recommendations(&report));
        }

        let quality = optional("data quality", self.assess_learning_data_quality().await)?;
        if let Some(report) = quality {
            if report.needs_improvement {
                recommendations.push(Recommendation::new(
                    RecommendationCategory::DataQuality,
                    Priority::Medium,
                    report.issues.join("; "),
                    "Review pending feature suggestions and tighten validation of low confidence data",
                    "More reliable feature learning",
                ));
            }
        }

        recommendations.sort_by(|a, b| b.priority.cmp(&a.priority));
        info!("Generated {} improvement recommendations", recommendations.len());
        Ok(recommendations)
    }
}

fn drift_recommendations(report: &DriftReport) -> Vec<Recommendation> {
    let mut out = Vec::new();
    if report.satisfaction_declining {
        out.push(Recommendation::new(
            RecommendationCategory::AlgorithmPerformance,
            Priority::Critical,
            format!(
                "Declining user satisfaction trend ({:.3} per window)",
                report.satisfaction_slope
            ),
            "Investigate recent scoring or category changes and revert if necessary",
            "Stop satisfaction decline",
        ));
    }
    if report.sudden_satisfaction_drop {
        out.push(Recommendation::new(
            RecommendationCategory::AlgorithmPerformance,
            Priority::High,
            "Sudden drop in mean satisfaction between windows",
            "Check items and categories changed around the drop",
            "Recover satisfaction lost in the drop",
        ));
    }
    if report.confidence_declining {
        out.push(Recommendation::new(
            RecommendationCategory::AlgorithmPerformance,
            Priority::Medium,
            format!(
                "Declining assignment confidence ({:.3} per window)",
                report.confidence_slope
            ),
            "Revisit hybrid thresholds and category feature overlap",
            "Clearer primary style assignments",
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::storage::{SatisfactionUpdate, SqliteStore};
    use crate::types::{
        FeatureLearningData, FeatureSource, FeedbackType, Gender, QuizResponse, StyleAssignmentFeedback,
    };
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    async fn seed_feedback(store: &SqliteStore, category: &str, rating: u8, days_ago: i64) {
        let response = QuizResponse {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "user".into(),
            gender: Gender::Female,
            selections: BTreeMap::new(),
            calculated_scores: BTreeMap::new(),
            assigned_category: category.into(),
            hybrid_categories: vec![category.into()],
            confidence_score: 50.0,
            satisfaction_rating: None,
            feedback_text: None,
            completed_at: Utc::now() - Duration::days(days_ago),
        };
        store.record_quiz_submission(&response).await.unwrap();
        store
            .record_satisfaction(&SatisfactionUpdate {
                feedback: StyleAssignmentFeedback {
                    id: uuid::Uuid::new_v4().to_string(),
                    quiz_response_id: response.id.clone(),
                    user_id: "user".into(),
                    accuracy_rating: rating,
                    feedback_type: FeedbackType::MostlyRight,
                    preferred_style: None,
                    feedback_text: None,
                    feature_feedback: BTreeMap::new(),
                    created_at: Utc::now(),
                },
                overall_rating: Some(rating),
                feedback_text: None,
                item_ratings: BTreeMap::new(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_store_yields_no_recommendations() {
        let analyzer = BehavioralAnalyzer::new(SqliteStore::open_in_memory().unwrap(), AnalysisConfig::default());
        let recs = analyzer.generate_improvement_recommendations().await.unwrap();
        assert!(recs.is_empty());
    }

    #[tokio::test]
    async fn test_recommendations_sorted_by_priority() {
        let store = SqliteStore::open_in_memory().unwrap();
        for _ in 0..5 {
            seed_feedback(&store, "Boho", 2, 1).await;
        }
        store
            .insert_learning_data(&FeatureLearningData::new("fringe", "item", FeatureSource::UserSuggested, 0.1))
            .await
            .unwrap();

        let analyzer = BehavioralAnalyzer::new(store, AnalysisConfig::default());
        let recs = analyzer.generate_improvement_recommendations().await.unwrap();

        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].priority, Priority::High);
        assert_eq!(recs[0].category, RecommendationCategory::StyleImprovement);
        assert_eq!(recs[0].related_to.as_deref(), Some("Boho"));
        assert_eq!(recs[1].category, RecommendationCategory::DataQuality);
    }

    #[test]
    fn test_declining_drift_is_critical() {
        let report = DriftReport {
            lookback_days: 60,
            window_days: 7,
            responses_analyzed: 20,
            windows: Vec::new(),
            satisfaction_slope: -0.4,
            confidence_slope: -0.2,
            satisfaction_declining: true,
            confidence_declining: true,
            sudden_satisfaction_drop: false,
            performance_stable: false,
            alerts: Vec::new(),
        };
        let recs = drift_recommendations(&report);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].priority, Priority::Critical);
        assert_eq!(recs[1].priority, Priority::Medium);
    }
}
