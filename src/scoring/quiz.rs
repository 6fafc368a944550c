//! Quiz submission processing

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::info;

use super::engine::ScoreEngine;
use crate::error::{EngineError, EngineResult};
use crate::storage::SqliteStore;
use crate::types::{ClothingItem, Gender, QuizResponse, Slot};

/// Turns raw selections into a persisted, scored [`QuizResponse`].
pub struct QuizProcessor {
    store: SqliteStore,
    engine: ScoreEngine,
}

impl QuizProcessor {
    pub fn new(store: SqliteStore, engine: ScoreEngine) -> Self {
        Self { store, engine }
    }

    pub async fn process_quiz_submission(
        &self,
        user_id: &str,
        gender: Gender,
        selections: BTreeMap<Slot, String>,
    ) -> EngineResult<QuizResponse> {
        if user_id.trim().is_empty() {
            return Err(EngineError::validation("user id must not be empty"));
        }
        if selections.is_empty() {
            return Err(EngineError::validation("quiz submission has no selections"));
        }

        let mut items: BTreeMap<Slot, ClothingItem> = BTreeMap::new();
        for (slot, item_id) in &selections {
            let item = self
                .store
                .get_item(item_id)
                .await?
                .ok_or_else(|| EngineError::not_found("clothing item", item_id.as_str()))?;
            if !item.is_active {
                return Err(EngineError::validation(format!("item {} is not active", item.id)));
            }
            if item.gender != gender {
                return Err(EngineError::validation(format!(
                    "item {} is for {}, quiz is for {}",
                    item.id, item.gender, gender
                )));
            }
            if item.slot != *slot {
                return Err(EngineError::validation(format!(
                    "item {} is a {} item, selected for {}",
                    item.id, item.slot, slot
                )));
            }
            items.insert(*slot, item);
        }

        let categories = self.store.list_categories(Some(gender), true).await?;
        let by_slot: BTreeMap<Slot, &ClothingItem> =
            items.iter().map(|(slot, item)| (*slot, item)).collect();
        let assignment = self.engine.assign_style(&by_slot, &categories)?;

        let response = QuizResponse {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            gender,
            selections,
            calculated_scores: assignment.scores.clone(),
            assigned_category: assignment.primary.clone(),
            hybrid_categories: assignment.hybrid_names(),
            confidence_score: assignment.confidence,
            satisfaction_rating: None,
            feedback_text: None,
            completed_at: Utc::now(),
        };

        self.store.record_quiz_submission(&response).await?;

        info!(
            "Quiz submitted for user {}: {} (confidence {:.1})",
            user_id, assignment.message, assignment.confidence
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StyleCategory;

    async fn setup() -> (QuizProcessor, SqliteStore, ClothingItem) {
        let store = SqliteStore::open_in_memory().unwrap();
        let minimalist =
            StyleCategory::new("Minimalist", Gender::Female, &["minimal", "neutral"]).unwrap();
        let streetwear =
            StyleCategory::new("Streetwear", Gender::Female, &["urban", "graphic"]).unwrap();
        store.insert_category(&minimalist).await.unwrap();
        store.insert_category(&streetwear).await.unwrap();

        let top = ClothingItem::new("Plain Tee", Gender::Female, Slot::Top, &["minimal"]).unwrap();
        store.insert_item(&top).await.unwrap();
        (QuizProcessor::new(store.clone(), ScoreEngine::default()), store, top)
    }

    #[tokio::test]
    async fn test_submission_persists_and_counts_selection() {
        let (processor, store, top) = setup().await;
        let selections = BTreeMap::from([(Slot::Top, top.id.clone())]);

        let response = processor
            .process_quiz_submission("user-1", Gender::Female, selections)
            .await
            .unwrap();
        assert_eq!(response.assigned_category, "Minimalist");
        assert_eq!(response.calculated_scores["Minimalist"], 100.0);

        let stored = store.get_quiz_response(&response.id).await.unwrap().unwrap();
        assert_eq!(stored.selections[&Slot::Top], top.id);
        let item = store.get_item(&top.id).await.unwrap().unwrap();
        assert_eq!(item.selection_count, 1);
    }

    #[tokio::test]
    async fn test_gender_mismatch_rejected() {
        let (processor, store, top) = setup().await;
        let selections = BTreeMap::from([(Slot::Top, top.id.clone())]);

        let err = processor
            .process_quiz_submission("user-1", Gender::Male, selections)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.stats().await.unwrap().quiz_responses, 0);
    }

    #[tokio::test]
    async fn test_unknown_item_rejected() {
        let (processor, _store, _top) = setup().await;
        let selections = BTreeMap::from([(Slot::Shoes, "missing".to_string())]);
        let err = processor
            .process_quiz_submission("user-1", Gender::Female, selections)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
