//! Feature learning engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::correlations::{mine_correlations, CorrelationPass};
use super::patterns::{discover_patterns, pattern_suggestions, FeaturePattern};
use crate::config::{LearningConfig, VisionConfig};
use crate::error::{EngineError, EngineResult};
use crate::storage::SqliteStore;
use crate::types::{
    days_before_now, normalize_feature, ClothingItem, FeatureCorrelation, FeatureLearningData, FeatureSource,
};
use crate::vision::{ImageLoader, VisionClient};

/// Outcome of resolving stale pending suggestions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingValidationReport {
    pub examined: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Learns item features from vision output, user feedback and catalog statistics.
pub struct FeatureLearningEngine {
    pub(super) store: SqliteStore,
    pub(super) config: LearningConfig,
    pub(super) vision_config: VisionConfig,
    pub(super) vision: Option<Arc<dyn VisionClient>>,
    pub(super) images: Option<Arc<dyn ImageLoader>>,
}

impl FeatureLearningEngine {
    pub fn new(store: SqliteStore, config: LearningConfig, vision_config: VisionConfig) -> Self {
        Self {
            store,
            config,
            vision_config,
            vision: None,
            images: None,
        }
    }

    /// Attach the vision collaborator used by batch extraction.
    pub fn with_vision(mut self, vision: Arc<dyn VisionClient>, images: Arc<dyn ImageLoader>) -> Self {
        self.vision = Some(vision);
        self.images = Some(images);
        self
    }

    pub fn has_vision(&self) -> bool {
        self.vision.is_some() && self.images.is_some()
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Record a suggested feature for an item. Both review counters start at 0.
    pub async fn add_feature_suggestion(
        &self,
        feature_name: &str,
        item_id: &str,
        source: FeatureSource,
        confidence: f64,
    ) -> EngineResult<FeatureLearningData> {
        let feature = normalize_feature(feature_name)?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EngineError::validation(format!(
                "confidence must be between 0 and 1, got {}",
                confidence
            )));
        }
        if self.store.get_item(item_id).await?.is_none() {
            return Err(EngineError::not_found("clothing item", item_id));
        }

        let data = FeatureLearningData::new(&feature, item_id, source, confidence);
        self.store.insert_learning_data(&data).await?;
        debug!(
            "Added {} suggestion '{}' for item {} ({:.2})",
            source, feature, item_id, confidence
        );
        Ok(data)
    }

    /// Record one review of a suggestion; acceptance adds it to the item.
    pub async fn validate_feature(&self, id: &str, is_valid: bool) -> EngineResult<FeatureLearningData> {
        let record = self.store.apply_validation(id, is_valid).await?;
        info!(
            "Feature '{}' on item {} {} (ratio {:.2})",
            record.feature_name,
            record.item_id,
            if is_valid { "validated" } else { "rejected" },
            record.validation_ratio()
        );
        Ok(record)
    }

    /// Active items that carry at least one feature, as (id, combined features).
    async fn feature_snapshot(&self) -> EngineResult<Vec<(String, BTreeSet<String>)>> {
        let items = self.store.list_items(true).await?;
        Ok(items
            .iter()
            .map(|item: &ClothingItem| (item.id.clone(), item.combined_features()))
            .filter(|(_, features)| !features.is_empty())
            .collect())
    }

    /// Frequent feature groups across the active catalog.
    pub async fn discover_feature_patterns(&self, min_support: f64) -> EngineResult<Vec<FeaturePattern>> {
        let snapshot = self.feature_snapshot().await?;
        let sets: Vec<BTreeSet<String>> = snapshot.into_iter().map(|(_, f)| f).collect();
        let patterns = discover_patterns(&sets, min_support, self.config.max_pattern_size)?;
        info!(
            "Discovered {} feature patterns across {} items (min support {:.2})",
            patterns.len(),
            sets.len(),
            min_support
        );
        Ok(patterns)
    }

    /// Turn confident pattern rules into `algorithm_discovered` suggestions,
    /// skipping item/feature pairs that already have one.
    pub async fn suggest_from_patterns(
        &self,
        patterns: &[FeaturePattern],
    ) -> EngineResult<Vec<FeatureLearningData>> {
        let snapshot = self.feature_snapshot().await?;
        let suggestions =
            pattern_suggestions(&snapshot, patterns, self.config.min_confidence_threshold);

        let mut created = Vec::new();
        for suggestion in suggestions {
            let existing = self
                .store
                .find_learning_data(
                    &suggestion.item_id,
                    &suggestion.feature,
                    Some(FeatureSource::AlgorithmDiscovered),
                )
                .await?;
            if !existing.is_empty() {
                continue;
            }
            let data = self
                .add_feature_suggestion(
                    &suggestion.feature,
                    &suggestion.item_id,
                    FeatureSource::AlgorithmDiscovered,
                    suggestion.confidence.clamp(0.0, 1.0),
                )
                .await?;
            created.push(data);
        }

        if !created.is_empty() {
            info!("Created {} pattern-based feature suggestions", created.len());
        }
        Ok(created)
    }

    /// Recompute pairwise co-occurrence from the current catalog and upsert it.
    pub async fn mine_feature_correlations(&self) -> EngineResult<CorrelationPass> {
        let snapshot = self.feature_snapshot().await?;
        let sets: Vec<BTreeSet<String>> = snapshot.into_iter().map(|(_, f)| f).collect();
        let pass = mine_correlations(&sets);
        self.store.upsert_correlations(&pass.correlations).await?;
        info!(
            "Mined {} feature correlations from {} items",
            pass.correlations.len(),
            pass.items_analyzed
        );
        Ok(pass)
    }

    pub async fn get_feature_correlations(
        &self,
        feature: &str,
        min_strength: f64,
    ) -> EngineResult<Vec<FeatureCorrelation>> {
        let feature = normalize_feature(feature)?;
        self.store.correlations_for(&feature, min_strength).await
    }

    /// Resolve suggestions nobody reviewed within the staleness window:
    /// confident ones are accepted, the rest rejected.
    pub async fn process_pending_validations(&self) -> EngineResult<PendingValidationReport> {
        let cutoff = days_before_now(self.config.pending_staleness_days, "pending staleness")?;
        let pending = self.store.pending_learning_data_before(cutoff).await?;
        let mut report = PendingValidationReport {
            examined: pending.len(),
            ..Default::default()
        };

        for record in pending {
            let accept = record.confidence_score >= self.config.min_confidence_threshold;
            match self.store.apply_validation(&record.id, accept).await {
                Ok(_) if accept => report.accepted += 1,
                Ok(_) => report.rejected += 1,
                Err(e) => {
                    warn!("Failed to resolve pending feature {}: {}", record.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Processed {} pending validations ({} accepted, {} rejected)",
            report.examined, report.accepted, report.rejected
        );
        Ok(report)
    }

    /// Delete old, barely reviewed, low-confidence suggestions.
    pub async fn prune_stale_learning_data(&self) -> EngineResult<usize> {
        let cutoff = days_before_now(self.config.retention_days, "retention")?;
        let deleted = self
            .store
            .delete_stale_learning_data(
                cutoff,
                self.config.min_validation_count,
                self.config.min_confidence_threshold,
            )
            .await?;
        info!("Pruned {} stale learning records", deleted);
        Ok(deleted)
    }
}
