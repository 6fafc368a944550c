//! Style assignment accuracy

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use super::{fraction, mean, std_dev, BehavioralAnalyzer};
use crate::error::{EngineError, EngineResult};
use crate::types::days_before_now;

/// Rating at which an assignment counts as accurate
const HIGH_ACCURACY_RATING: u8 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAccuracy {
    pub category: String,
    pub sample_size: usize,
    pub average_accuracy: f64,
    pub accuracy_std: f64,
    pub high_accuracy_rate: f64,
    pub average_satisfaction: Option<f64>,
    pub average_confidence: f64,
    pub feedback_distribution: BTreeMap<String, usize>,
    /// Enough samples to act on
    pub reliable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub window_days: i64,
    pub feedback_analyzed: usize,
    pub average_accuracy: f64,
    pub accuracy_std: f64,
    pub high_accuracy_rate: f64,
    pub categories: Vec<CategoryAccuracy>,
}

impl AccuracyReport {
    /// Reliable categories whose high-accuracy rate is below `threshold`.
    pub fn underperforming(&self, threshold: f64) -> impl Iterator<Item = &CategoryAccuracy> {
        self.categories
            .iter()
            .filter(move |c| c.reliable && c.high_accuracy_rate < threshold)
    }
}

struct Sample {
    accuracy: u8,
    satisfaction: Option<u8>,
    confidence: f64,
    feedback_type: String,
}

impl BehavioralAnalyzer {
    /// Accuracy of assignments made in the last `days`, per category and overall.
    pub async fn analyze_style_assignment_accuracy(&self, days: i64) -> EngineResult<AccuracyReport> {
        if days <= 0 {
            return Err(EngineError::validation("analysis window must be positive"));
        }
        let cutoff = days_before_now(days, "analysis window")?;
        let responses = self.store.quiz_responses_since(cutoff).await?;
        let by_id: HashMap<&str, _> = responses.iter().map(|r| (r.id.as_str(), r)).collect();
        let feedback = self.store.feedback_since(cutoff).await?;

        let mut grouped: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
        let mut all_ratings = Vec::new();
        for fb in &feedback {
            let Some(response) = by_id.get(fb.quiz_response_id.as_str()) else {
                continue;
            };
            all_ratings.push(fb.accuracy_rating);
            grouped
                .entry(response.assigned_category.clone())
                .or_default()
                .push(Sample {
                    accuracy: fb.accuracy_rating,
                    satisfaction: response.satisfaction_rating,
                    confidence: response.confidence_score,
                    feedback_type: fb.feedback_type.to_string(),
                });
        }

        if all_ratings.is_empty() {
            return Err(EngineError::insufficient(format!(
                "no assignment feedback in the last {} days",
                days
            )));
        }

        let categories = grouped
            .into_iter()
            .map(|(category, samples)| {
                let accuracy: Vec<f64> = samples.iter().map(|s| s.accuracy as f64).collect();
                let satisfaction: Vec<f64> = samples
                    .iter()
                    .filter_map(|s| s.satisfaction.map(f64::from))
                    .collect();
                let confidence: Vec<f64> = samples.iter().map(|s| s.confidence).collect();
                let mut feedback_distribution = BTreeMap::new();
                for s in &samples {
                    *feedback_distribution.entry(s.feedback_type.clone()).or_insert(0) += 1;
                }

                CategoryAccuracy {
                    sample_size: samples.len(),
                    average_accuracy: mean(&accuracy),
                    accuracy_std: std_dev(&accuracy),
                    high_accuracy_rate: fraction(&samples, |s| s.accuracy >= HIGH_ACCURACY_RATING),
                    average_satisfaction: (!satisfaction.is_empty()).then(|| mean(&satisfaction)),
                    average_confidence: mean(&confidence),
                    feedback_distribution,
                    reliable: samples.len() >= self.config.min_data_points,
                    category,
                }
            })
            .collect();

        let overall: Vec<f64> = all_ratings.iter().map(|r| *r as f64).collect();
        let report = AccuracyReport {
            window_days: days,
            feedback_analyzed: all_ratings.len(),
            average_accuracy: mean(&overall),
            accuracy_std: std_dev(&overall),
            high_accuracy_rate: fraction(&all_ratings, |r| *r >= HIGH_ACCURACY_RATING),
            categories,
        };

        info!(
            "Analyzed assignment accuracy over {} feedback entries ({} categories)",
            report.feedback_analyzed,
            report.categories.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::storage::{SatisfactionUpdate, SqliteStore};
    use crate::types::{FeedbackType, Gender, QuizResponse, StyleAssignmentFeedback};
    use chrono::{Duration, Utc};

    async fn seed(store: &SqliteStore, category: &str, rating: u8, days_ago: i64) {
        let response = QuizResponse {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "user".into(),
            gender: Gender::Female,
            selections: BTreeMap::new(),
            calculated_scores: BTreeMap::new(),
            assigned_category: category.into(),
            hybrid_categories: vec![category.into()],
            confidence_score: 40.0,
            satisfaction_rating: None,
            feedback_text: None,
            completed_at: Utc::now() - Duration::days(days_ago),
        };
        store.record_quiz_submission(&response).await.unwrap();
        let update = SatisfactionUpdate {
            feedback: StyleAssignmentFeedback {
                id: uuid::Uuid::new_v4().to_string(),
                quiz_response_id: response.id.clone(),
                user_id: "user".into(),
                accuracy_rating: rating,
                feedback_type: if rating >= 4 { FeedbackType::Perfect } else { FeedbackType::TooBroad },
                preferred_style: None,
                feedback_text: None,
                feature_feedback: BTreeMap::new(),
                created_at: Utc::now() - Duration::days(days_ago),
            },
            overall_rating: Some(rating),
            feedback_text: None,
            item_ratings: BTreeMap::new(),
        };
        store.record_satisfaction(&update).await.unwrap();
    }

    #[tokio::test]
    async fn test_eight_of_ten_accurate() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..10 {
            seed(&store, "Minimalist", if i < 8 { 5 } else { 2 }, 1).await;
        }
        let analyzer = BehavioralAnalyzer::new(store, AnalysisConfig::default());
        let report = analyzer.analyze_style_assignment_accuracy(30).await.unwrap();

        let minimalist = &report.categories[0];
        assert_eq!(minimalist.sample_size, 10);
        assert!((minimalist.high_accuracy_rate - 0.8).abs() < 1e-9);
        assert!(minimalist.reliable);
        assert_eq!(minimalist.feedback_distribution["perfect"], 8);
        assert!((report.high_accuracy_rate - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_small_categories_flagged_unreliable() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed(&store, "Boho", 2, 1).await;
        seed(&store, "Boho", 3, 1).await;
        let analyzer = BehavioralAnalyzer::new(store, AnalysisConfig::default());
        let report = analyzer.analyze_style_assignment_accuracy(30).await.unwrap();
        assert!(!report.categories[0].reliable);
        assert_eq!(report.underperforming(0.6).count(), 0);
    }

    #[tokio::test]
    async fn test_no_feedback_in_window_is_insufficient() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed(&store, "Boho", 5, 60).await;
        let analyzer = BehavioralAnalyzer::new(store, AnalysisConfig::default());
        let err = analyzer.analyze_style_assignment_accuracy(30).await.unwrap_err();
        assert!(err.is_insufficient_data());
    }

    #[tokio::test]
    async fn test_huge_window_is_validation_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let analyzer = BehavioralAnalyzer::new(store, AnalysisConfig::default());
        let err = analyzer.analyze_style_assignment_accuracy(i64::MAX).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
