//! Batch feature extraction through the vision collaborator

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::engine::FeatureLearningEngine;
use crate::error::{EngineError, EngineResult};

/// Per-item extraction outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub item_id: String,
    /// Normalized features returned by the vision service
    pub features: Vec<String>,
    /// How many of those were new to the item
    pub new_features: usize,
    pub suggested_category: Option<String>,
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn failed(item_id: &str, error: &EngineError) -> Self {
        Self {
            item_id: item_id.to_string(),
            features: Vec::new(),
            new_features: 0,
            suggested_category: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchExtractionReport {
    pub results: Vec<ExtractionResult>,
    pub succeeded: usize,
    pub failed: usize,
}

impl FeatureLearningEngine {
    /// Run extraction for every id with bounded concurrency. A failing item is
    /// reported in its result and never aborts the batch.
    pub async fn batch_extract_features(&self, item_ids: &[String]) -> EngineResult<BatchExtractionReport> {
        if !self.has_vision() {
            return Err(EngineError::Config("vision service is not configured".into()));
        }

        let concurrency = self.vision_config.max_concurrency.max(1);
        // Owned ids keep the stream future Send so the cycle can be spawned.
        let mut indexed: Vec<(usize, ExtractionResult)> = stream::iter(item_ids.iter().cloned().enumerate())
            .map(|(index, item_id)| async move {
                let result = match self.extract_one(item_id.as_str()).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Feature extraction failed for item {}: {}", item_id, e);
                        ExtractionResult::failed(&item_id, &e)
                    }
                };
                (index, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let results: Vec<ExtractionResult> = indexed.into_iter().map(|(_, r)| r).collect();
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let report = BatchExtractionReport {
            failed: results.len() - succeeded,
            succeeded,
            results,
        };

        info!(
            "Batch extraction finished: {} succeeded, {} failed",
            report.succeeded, report.failed
        );
        Ok(report)
    }

    async fn extract_one(&self, item_id: &str) -> EngineResult<ExtractionResult> {
        let (vision, images) = match (&self.vision, &self.images) {
            (Some(vision), Some(images)) => (vision, images),
            _ => return Err(EngineError::Config("vision service is not configured".into())),
        };
        let timeout = Duration::from_secs(self.vision_config.timeout_secs);

        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| EngineError::not_found("clothing item", item_id))?;

        let bytes = tokio::time::timeout(timeout, images.load(&item))
            .await
            .map_err(|_| {
                EngineError::ExternalService(format!("image load timed out after {:?}", timeout))
            })??;

        let analysis = tokio::time::timeout(timeout, vision.analyze(&bytes))
            .await
            .map_err(|_| {
                EngineError::ExternalService(format!("vision analysis timed out after {:?}", timeout))
            })??;

        let features = analysis.features_with_confidence();
        let new_features = self.store.record_extraction(item_id, &features).await?;

        Ok(ExtractionResult {
            item_id: item_id.to_string(),
            features: features.into_iter().map(|(f, _)| f).collect(),
            new_features,
            suggested_category: analysis.suggested_category,
            error: None,
        })
    }
}
