//! User satisfaction tracking

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::engine::FeatureLearningEngine;
use crate::error::{EngineError, EngineResult};
use crate::storage::SatisfactionUpdate;
use crate::types::{normalize_feature, validate_rating, FeedbackType, StyleAssignmentFeedback};

/// A user's report on their style assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionData {
    pub accuracy_rating: u8,
    pub feedback_type: FeedbackType,
    #[serde(default)]
    pub overall_rating: Option<u8>,
    #[serde(default)]
    pub feedback_text: Option<String>,
    #[serde(default)]
    pub preferred_style: Option<String>,
    /// item id -> rating
    #[serde(default)]
    pub item_ratings: BTreeMap<String, u8>,
    /// item id -> feature -> accurate
    #[serde(default)]
    pub feature_feedback: BTreeMap<String, BTreeMap<String, bool>>,
}

impl SatisfactionData {
    pub fn new(accuracy_rating: u8, feedback_type: FeedbackType) -> Self {
        Self {
            accuracy_rating,
            feedback_type,
            overall_rating: None,
            feedback_text: None,
            preferred_style: None,
            item_ratings: BTreeMap::new(),
            feature_feedback: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionOutcome {
    pub feedback_id: String,
    pub items_updated: usize,
    pub features_validated: usize,
    pub features_rejected: usize,
}

impl FeatureLearningEngine {
    /// Store feedback for a quiz response and fold its ratings into the
    /// response, the selected items and the matching feature suggestions.
    pub async fn track_user_satisfaction(
        &self,
        user_id: &str,
        quiz_response_id: &str,
        data: SatisfactionData,
    ) -> EngineResult<SatisfactionOutcome> {
        validate_rating(data.accuracy_rating, "accuracy_rating")?;
        if let Some(rating) = data.overall_rating {
            validate_rating(rating, "overall_rating")?;
        }
        for rating in data.item_ratings.values() {
            validate_rating(*rating, "item rating")?;
        }

        let response = self
            .store
            .get_quiz_response(quiz_response_id)
            .await?
            .ok_or_else(|| EngineError::not_found("quiz response", quiz_response_id))?;
        if response.user_id != user_id {
            return Err(EngineError::validation(format!(
                "quiz response {} does not belong to user {}",
                quiz_response_id, user_id
            )));
        }

        let mut feature_feedback = BTreeMap::new();
        for (item_id, features) in data.feature_feedback {
            let mut normalized = BTreeMap::new();
            for (feature, accurate) in features {
                normalized.insert(normalize_feature(&feature)?, accurate);
            }
            feature_feedback.insert(item_id, normalized);
        }

        let feedback = StyleAssignmentFeedback {
            id: uuid::Uuid::new_v4().to_string(),
            quiz_response_id: quiz_response_id.to_string(),
            user_id: user_id.to_string(),
            accuracy_rating: data.accuracy_rating,
            feedback_type: data.feedback_type,
            preferred_style: data.preferred_style,
            feedback_text: data.feedback_text.clone(),
            feature_feedback,
            created_at: Utc::now(),
        };
        let feedback_id = feedback.id.clone();

        let write = self
            .store
            .record_satisfaction(&SatisfactionUpdate {
                feedback,
                overall_rating: data.overall_rating,
                feedback_text: data.feedback_text,
                item_ratings: data.item_ratings,
            })
            .await?;

        info!(
            "Tracked satisfaction for user {}, quiz {} ({} items rated, {} features validated, {} rejected)",
            user_id,
            quiz_response_id,
            write.items_updated,
            write.features_validated,
            write.features_rejected
        );

        Ok(SatisfactionOutcome {
            feedback_id,
            items_updated: write.items_updated,
            features_validated: write.features_validated,
            features_rejected: write.features_rejected,
        })
    }
}
