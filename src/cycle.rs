//! Daily improvement cycle
//!
//! Runs every learning and analysis stage in a fixed order. A failing stage is
//! recorded in the summary and the remaining stages still run. Only one cycle
//! may be active at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::analysis::{BehavioralAnalyzer, Recommendation};
use crate::error::{EngineError, EngineResult};
use crate::learning::{FeatureLearningEngine, PendingValidationReport};

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    Manual,
    Scheduled,
}

impl std::fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleTrigger::Manual => write!(f, "manual"),
            CycleTrigger::Scheduled => write!(f, "scheduled"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStage {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_features: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternStage {
    pub patterns_found: usize,
    pub suggestions_created: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationStage {
    pub items_analyzed: usize,
    pub correlations: usize,
    pub strong_correlations: usize,
}

/// Per-stage results. `None` means the stage failed or was skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStages {
    pub extraction: Option<ExtractionStage>,
    pub patterns: Option<PatternStage>,
    pub correlations: Option<CorrelationStage>,
    pub recommendations: Option<Vec<Recommendation>>,
    pub validations: Option<PendingValidationReport>,
    pub pruned: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub trigger: CycleTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stages: CycleStages,
    pub skipped: Vec<String>,
    pub errors: Vec<StageError>,
}

impl CycleSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Default)]
struct CycleState {
    running_since: Option<DateTime<Utc>>,
    last_run: Option<CycleSummary>,
}

/// Clears the running flag when dropped, including during a panic unwind.
struct RunGuard<'a> {
    state: &'a Mutex<CycleState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        lock_state(self.state).running_since = None;
    }
}

fn lock_state(state: &Mutex<CycleState>) -> MutexGuard<'_, CycleState> {
    // A panic while holding the lock leaves the state itself consistent.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Orchestrates the daily learning run. Share it behind an `Arc` between
/// the scheduler and manual triggers.
pub struct ImprovementCycle {
    learning: Arc<FeatureLearningEngine>,
    analyzer: Arc<BehavioralAnalyzer>,
    state: Mutex<CycleState>,
}

impl ImprovementCycle {
    pub fn new(learning: Arc<FeatureLearningEngine>, analyzer: Arc<BehavioralAnalyzer>) -> Self {
        Self {
            learning,
            analyzer,
            state: Mutex::new(CycleState::default()),
        }
    }

    /// Start time of the active run, if any
    pub fn running_since(&self) -> Option<DateTime<Utc>> {
        lock_state(&self.state).running_since
    }

    pub fn last_run(&self) -> Option<CycleSummary> {
        lock_state(&self.state).last_run.clone()
    }

    fn acquire(&self) -> EngineResult<RunGuard<'_>> {
        let mut state = lock_state(&self.state);
        if let Some(started_at) = state.running_since {
            return Err(EngineError::CycleInProgress { started_at });
        }
        state.running_since = Some(Utc::now());
        Ok(RunGuard { state: &self.state })
    }

    /// Run all stages once. Fails only when another run is already active.
    pub async fn run(&self, trigger: CycleTrigger) -> EngineResult<CycleSummary> {
        let _guard = self.acquire()?;
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Starting {} improvement cycle", trigger);

        let mut stages = CycleStages::default();
        let mut skipped = Vec::new();
        let mut errors = Vec::new();
        let config = self.learning.config().clone();

        // (a) extraction
        if self.learning.has_vision() {
            stages.extraction = capture(
                "extraction",
                &mut errors,
                self.extraction_stage(config.extraction_batch_limit),
            )
            .await;
        } else {
            info!("Vision service not configured; skipping feature extraction");
            skipped.push("extraction".to_string());
        }

        // (b) patterns
        stages.patterns = capture("patterns", &mut errors, self.pattern_stage(config.min_support)).await;

        // (c) correlations
        stages.correlations = capture(
            "correlations",
            &mut errors,
            self.correlation_stage(config.strong_correlation),
        )
        .await;

        // (d) recommendations
        stages.recommendations = capture(
            "recommendations",
            &mut errors,
            self.analyzer.generate_improvement_recommendations(),
        )
        .await;

        // (e) pending validations
        stages.validations = capture(
            "validations",
            &mut errors,
            self.learning.process_pending_validations(),
        )
        .await;

        // (f) pruning
        stages.pruned = capture("pruning", &mut errors, self.learning.prune_stale_learning_data()).await;

        let summary = CycleSummary {
            trigger,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            stages,
            skipped,
            errors,
        };

        if summary.is_clean() {
            info!("Improvement cycle finished in {}ms", summary.duration_ms);
        } else {
            warn!(
                "Improvement cycle finished in {}ms with {} stage errors",
                summary.duration_ms,
                summary.errors.len()
            );
        }
        lock_state(&self.state).last_run = Some(summary.clone());
        Ok(summary)
    }

    /// The scheduled daily run.
    pub async fn run_daily_improvement_cycle(&self) -> EngineResult<CycleSummary> {
        self.run(CycleTrigger::Scheduled).await
    }

    async fn extraction_stage(&self, limit: usize) -> EngineResult<ExtractionStage> {
        let items = self.learning.store().items_needing_extraction(limit).await?;
        let ids: Vec<String> = items.into_iter().map(|i| i.id).collect();
        if ids.is_empty() {
            return Ok(ExtractionStage::default());
        }
        let report = self.learning.batch_extract_features(&ids).await?;
        Ok(ExtractionStage {
            attempted: report.results.len(),
            succeeded: report.succeeded,
            failed: report.failed,
            new_features: report.results.iter().map(|r| r.new_features).sum(),
        })
    }

    async fn pattern_stage(&self, min_support: f64) -> EngineResult<PatternStage> {
        let patterns = self.learning.discover_feature_patterns(min_support).await?;
        let created = self.learning.suggest_from_patterns(&patterns).await?;
        Ok(PatternStage {
            patterns_found: patterns.len(),
            suggestions_created: created.len(),
        })
    }

    async fn correlation_stage(&self, strong: f64) -> EngineResult<CorrelationStage> {
        let pass = self.learning.mine_feature_correlations().await?;
        Ok(CorrelationStage {
            items_analyzed: pass.items_analyzed,
            strong_correlations: pass
                .correlations
                .iter()
                .filter(|c| c.correlation_strength > strong)
                .count(),
            correlations: pass.correlations.len(),
        })
    }
}

async fn capture<T, F>(stage: &str, errors: &mut Vec<StageError>, fut: F) -> Option<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Cycle stage {} failed: {}", stage, e);
            errors.push(StageError {
                stage: stage.to_string(),
                message: e.to_string(),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisConfig, LearningConfig, VisionConfig};
    use crate::storage::SqliteStore;
    use crate::types::{ClothingItem, Gender, Slot};
    use crate::vision::{MockImageLoader, MockVisionClient, VisionAnalysis};
    use std::collections::BTreeMap;

    fn cycle_for(store: SqliteStore, learning: FeatureLearningEngine) -> ImprovementCycle {
        let analyzer = BehavioralAnalyzer::new(store, AnalysisConfig::default());
        ImprovementCycle::new(Arc::new(learning), Arc::new(analyzer))
    }

    async fn seed_catalog(store: &SqliteStore) {
        for (name, features) in [
            ("Tee", vec!["casual", "cotton"]),
            ("Hoodie", vec!["casual", "cotton"]),
            ("Chinos", vec!["casual", "cotton"]),
            ("Jeans", vec!["casual", "cotton"]),
            ("Blazer", vec!["casual", "wool"]),
        ] {
            let item = ClothingItem::new(name, Gender::Male, Slot::Top, &features[..]).unwrap();
            store.insert_item(&item).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_cycle_without_vision_skips_extraction() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed_catalog(&store).await;
        let learning = FeatureLearningEngine::new(store.clone(), LearningConfig::default(), VisionConfig::default());
        let cycle = cycle_for(store, learning);

        let summary = cycle.run(CycleTrigger::Manual).await.unwrap();
        assert!(summary.is_clean(), "{:?}", summary.errors);
        assert_eq!(summary.skipped, vec!["extraction".to_string()]);
        assert!(summary.stages.extraction.is_none());

        let correlations = summary.stages.correlations.unwrap();
        assert_eq!(correlations.items_analyzed, 5);
        assert!(correlations.strong_correlations >= 1);
        assert!(summary.stages.patterns.unwrap().patterns_found >= 1);
        // The only learning data is the fresh, unreviewed pattern suggestion.
        let recommendations = summary.stages.recommendations.unwrap();
        assert!(recommendations
            .iter()
            .all(|r| r.category == crate::analysis::RecommendationCategory::DataQuality));
        assert_eq!(summary.stages.pruned, Some(0));

        assert!(cycle.running_since().is_none());
        assert_eq!(cycle.last_run().unwrap().started_at, summary.started_at);
    }

    #[tokio::test]
    async fn test_cycle_runs_extraction_with_vision() {
        let store = SqliteStore::open_in_memory().unwrap();
        let item = ClothingItem::new("Tee", Gender::Male, Slot::Top, &["casual"]).unwrap();
        store.insert_item(&item).await.unwrap();

        let mut vision = MockVisionClient::new();
        vision.expect_analyze().returning(|_| {
            Ok(VisionAnalysis {
                extracted_features: vec!["cotton".into()],
                confidence_scores: BTreeMap::from([("cotton".to_string(), 0.9)]),
                suggested_category: None,
                dominant_colors: Vec::new(),
            })
        });
        let mut images = MockImageLoader::new();
        images.expect_load().returning(|_| Ok(vec![1, 2, 3]));

        let learning = FeatureLearningEngine::new(store.clone(), LearningConfig::default(), VisionConfig::default())
            .with_vision(Arc::new(vision), Arc::new(images));
        let cycle = cycle_for(store.clone(), learning);

        let summary = cycle.run(CycleTrigger::Scheduled).await.unwrap();
        let extraction = summary.stages.extraction.unwrap();
        assert_eq!(extraction.attempted, 1);
        assert_eq!(extraction.succeeded, 1);
        assert_eq!(extraction.new_features, 1);

        let stored = store.get_item(&item.id).await.unwrap().unwrap();
        assert!(stored.has_feature("cotton"));
        assert!(!stored.needs_extraction());
    }

    #[tokio::test]
    async fn test_cycle_with_vision_runs_on_spawned_task() {
        let store = SqliteStore::open_in_memory().unwrap();
        let item = ClothingItem::new("Tee", Gender::Male, Slot::Top, &["casual"]).unwrap();
        store.insert_item(&item).await.unwrap();

        let mut vision = MockVisionClient::new();
        vision.expect_analyze().returning(|_| Ok(VisionAnalysis::default()));
        let mut images = MockImageLoader::new();
        images.expect_load().returning(|_| Ok(vec![1]));

        let learning = FeatureLearningEngine::new(store.clone(), LearningConfig::default(), VisionConfig::default())
            .with_vision(Arc::new(vision), Arc::new(images));
        let cycle = Arc::new(cycle_for(store, learning));

        let handle = {
            let cycle = cycle.clone();
            tokio::spawn(async move { cycle.run(CycleTrigger::Scheduled).await })
        };
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.trigger, CycleTrigger::Scheduled);
        assert_eq!(summary.stages.extraction.unwrap().attempted, 1);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let learning = FeatureLearningEngine::new(store.clone(), LearningConfig::default(), VisionConfig::default());
        let cycle = cycle_for(store, learning);

        let guard = cycle.acquire().unwrap();
        let err = cycle.run(CycleTrigger::Manual).await.unwrap_err();
        assert!(matches!(err, EngineError::CycleInProgress { .. }));
        drop(guard);

        assert!(cycle.run(CycleTrigger::Manual).await.is_ok());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let store = SqliteStore::open_in_memory().unwrap();
        let learning = FeatureLearningEngine::new(store.clone(), LearningConfig::default(), VisionConfig::default());
        let cycle = cycle_for(store, learning);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cycle.acquire().unwrap();
            panic!("stage blew up");
        }));
        assert!(result.is_err());
        assert!(cycle.running_since().is_none());
    }
}
