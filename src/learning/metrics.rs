//! Learning system health metrics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::engine::FeatureLearningEngine;
use crate::error::EngineResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningMetrics {
    pub total_items: usize,
    pub items_with_auto_features: usize,
    pub extraction_coverage: f64,

    pub total_learning_records: usize,
    /// Records accepted at least once
    pub validated_records: usize,
    pub pending_records: usize,
    pub validation_rate: f64,

    pub total_correlations: usize,
    pub strong_correlations: usize,
    pub strong_correlation_rate: f64,

    pub total_responses: usize,
    /// Responses rated 4 or 5
    pub satisfied_responses: usize,
    pub satisfaction_rate: f64,

    pub source_distribution: BTreeMap<String, usize>,
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl FeatureLearningEngine {
    pub async fn learning_metrics(&self) -> EngineResult<LearningMetrics> {
        let items = self.store.list_items(false).await?;
        let records = self.store.list_learning_data().await?;
        let correlations = self.store.list_correlations().await?;
        let responses = self.store.list_quiz_responses(None).await?;

        let items_with_auto_features = items
            .iter()
            .filter(|i| !i.auto_extracted_features.is_empty())
            .count();
        let validated_records = records.iter().filter(|r| r.validation_count > 0).count();
        let pending_records = records.iter().filter(|r| r.is_pending()).count();
        let strong_correlations = correlations
            .iter()
            .filter(|c| c.correlation_strength > self.config.strong_correlation)
            .count();
        let satisfied_responses = responses
            .iter()
            .filter(|r| r.satisfaction_rating.map_or(false, |rating| rating >= 4))
            .count();

        let mut source_distribution = BTreeMap::new();
        for record in &records {
            *source_distribution.entry(record.source.to_string()).or_insert(0) += 1;
        }

        Ok(LearningMetrics {
            total_items: items.len(),
            items_with_auto_features,
            extraction_coverage: rate(items_with_auto_features, items.len()),
            total_learning_records: records.len(),
            validated_records,
            pending_records,
            validation_rate: rate(validated_records, records.len()),
            total_correlations: correlations.len(),
            strong_correlations,
            strong_correlation_rate: rate(strong_correlations, correlations.len()),
            total_responses: responses.len(),
            satisfied_responses,
            satisfaction_rate: rate(satisfied_responses, responses.len()),
            source_distribution,
        })
    }
}
