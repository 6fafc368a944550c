//! End-to-end tests for quiz scoring, feedback and the improvement cycle

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use style_learning::analysis::BehavioralAnalyzer;
use style_learning::config::{AnalysisConfig, LearningConfig, ScoringConfig, VisionConfig};
use style_learning::cycle::{CycleTrigger, ImprovementCycle};
use style_learning::learning::{FeatureLearningEngine, SatisfactionData};
use style_learning::scoring::{QuizProcessor, ScoreEngine};
use style_learning::{
    ClothingItem, EngineError, EngineResult, FeatureSource, FeedbackType, Gender, ImageLoader, Slot,
    SqliteStore, StyleCategory, VisionAnalysis, VisionClient,
};
use tokio::sync::Semaphore;

/// Vision service keyed on the image bytes
struct CatalogVision;

#[async_trait::async_trait]
impl VisionClient for CatalogVision {
    async fn analyze(&self, image: &[u8]) -> EngineResult<VisionAnalysis> {
        match image {
            b"shoe" => Ok(VisionAnalysis {
                extracted_features: vec!["Leather".into()],
                confidence_scores: BTreeMap::from([("leather".to_string(), 0.9)]),
                suggested_category: Some("Minimalist".into()),
                dominant_colors: Vec::new(),
            }),
            b"broken" => Err(EngineError::ExternalService("model unavailable".into())),
            _ => Ok(VisionAnalysis::default()),
        }
    }
}

/// Serves an item's image url as its bytes once the gate opens
struct GatedImages {
    gate: Arc<Semaphore>,
}

#[async_trait::async_trait]
impl ImageLoader for GatedImages {
    async fn load(&self, item: &ClothingItem) -> EngineResult<Vec<u8>> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| EngineError::ExternalService(e.to_string()))?;
        Ok(item.image_url.clone().unwrap_or_default().into_bytes())
    }
}

struct Fixture {
    store: SqliteStore,
    learning: Arc<FeatureLearningEngine>,
    cycle: Arc<ImprovementCycle>,
    gate: Arc<Semaphore>,
    minimal_top: ClothingItem,
    plain_tee: ClothingItem,
    shoe: ClothingItem,
    _dir: tempfile::TempDir,
}

async fn fixture() -> anyhow::Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let store = SqliteStore::open(dir.path().join("data").join("style.db")).await?;

    store
        .insert_category(&StyleCategory::new("Minimalist", Gender::Female, &["minimal", "neutral", "clean"])?)
        .await?;
    store
        .insert_category(&StyleCategory::new("Streetwear", Gender::Female, &["urban", "graphic", "oversized"])?)
        .await?;

    let minimal_top = ClothingItem::new("Minimal Top", Gender::Female, Slot::Top, &["minimal", "neutral"])?;
    store.insert_item(&minimal_top).await?;
    for name in ["Jeans", "Chinos", "Joggers", "Cargo"] {
        let item = ClothingItem::new(name, Gender::Female, Slot::Bottom, &["casual", "cotton"])?;
        store.insert_item(&item).await?;
    }
    let plain_tee = ClothingItem::new("Plain Tee", Gender::Female, Slot::Bottom, &["casual"])?;
    store.insert_item(&plain_tee).await?;
    let shoe = ClothingItem::new("Loafer", Gender::Female, Slot::Shoes, &[] as &[&str])?.with_image_url("shoe");
    store.insert_item(&shoe).await?;
    let broken = ClothingItem::new("Mystery", Gender::Female, Slot::Accessory, &[] as &[&str])?
        .with_image_url("broken");
    store.insert_item(&broken).await?;

    let gate = Arc::new(Semaphore::new(0));
    let learning = Arc::new(
        FeatureLearningEngine::new(store.clone(), LearningConfig::default(), VisionConfig::default()).with_vision(
            Arc::new(CatalogVision),
            Arc::new(GatedImages { gate: gate.clone() }),
        ),
    );
    let analyzer = Arc::new(BehavioralAnalyzer::new(store.clone(), AnalysisConfig::default()));
    let cycle = Arc::new(ImprovementCycle::new(learning.clone(), analyzer));

    Ok(Fixture {
        store,
        learning,
        cycle,
        gate,
        minimal_top,
        plain_tee,
        shoe,
        _dir: dir,
    })
}

#[tokio::test]
async fn test_quiz_and_feedback_flow() -> anyhow::Result<()> {
    let f = fixture().await?;
    let processor = QuizProcessor::new(f.store.clone(), ScoreEngine::new(ScoringConfig::default()));

    let response = processor
        .process_quiz_submission(
            "user-1",
            Gender::Female,
            BTreeMap::from([(Slot::Top, f.minimal_top.id.clone())]),
        )
        .await?;
    assert_eq!(response.assigned_category, "Minimalist");
    assert_eq!(response.calculated_scores["Minimalist"], 100.0);
    assert_eq!(response.calculated_scores["Streetwear"], 0.0);
    assert_eq!(response.confidence_score, 0.0);

    let selected = f.store.get_item(&f.minimal_top.id).await?.unwrap();
    assert_eq!(selected.selection_count, 1);

    // Another user's feedback is refused.
    let err = f
        .learning
        .track_user_satisfaction("user-2", &response.id, SatisfactionData::new(5, FeedbackType::Perfect))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut data = SatisfactionData::new(5, FeedbackType::Perfect);
    data.overall_rating = Some(4);
    let outcome = f.learning.track_user_satisfaction("user-1", &response.id, data).await?;
    assert_eq!(outcome.items_updated, 1);

    let rated = f.store.get_item(&f.minimal_top.id).await?.unwrap();
    assert_eq!(rated.satisfaction_score, Some(4.0));
    let stored = f.store.get_quiz_response(&response.id).await?.unwrap();
    assert_eq!(stored.satisfaction_rating, Some(4));
    Ok(())
}

#[tokio::test]
async fn test_full_cycle_learns_from_catalog() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.gate.add_permits(Semaphore::MAX_PERMITS / 2);

    let summary = f.cycle.run(CycleTrigger::Manual).await?;
    assert!(summary.is_clean(), "{:?}", summary.errors);
    assert!(summary.skipped.is_empty());

    // The broken image fails on its own without stopping the batch.
    let extraction = summary.stages.extraction.clone().unwrap();
    assert_eq!(extraction.attempted, 8);
    assert_eq!(extraction.failed, 1);
    assert_eq!(extraction.new_features, 1);
    let shoe = f.store.get_item(&f.shoe.id).await?.unwrap();
    assert!(shoe.has_feature("leather"));
    assert_eq!(shoe.feature_confidence_scores["leather"], 0.9);

    // casual appears on 5 items, cotton on 4 of them.
    let casual = f.learning.get_feature_correlations("casual", 0.0).await?;
    let cotton = casual
        .iter()
        .find(|c| c.feature_a == "casual" && c.feature_b == "cotton")
        .expect("casual/cotton correlation");
    assert_eq!(cotton.co_occurrence_count, 4);
    assert_eq!(cotton.total_occurrences, 5);
    assert!((cotton.correlation_strength - 0.8).abs() < 1e-9);
    assert!(summary.stages.correlations.unwrap().strong_correlations >= 1);

    // The plain tee is the one casual item without cotton.
    let suggested = f
        .store
        .find_learning_data(&f.plain_tee.id, "cotton", Some(FeatureSource::AlgorithmDiscovered))
        .await?;
    assert_eq!(suggested.len(), 1);
    assert!((suggested[0].confidence_score - 0.8).abs() < 1e-9);

    // Running again changes nothing in the correlation table.
    let before = f.store.list_correlations().await?;
    f.cycle.run(CycleTrigger::Manual).await?;
    let after = f.store.list_correlations().await?;
    assert_eq!(before.len(), after.len());
    assert_eq!(
        f.store
            .find_learning_data(&f.plain_tee.id, "cotton", Some(FeatureSource::AlgorithmDiscovered))
            .await?
            .len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_overlapping_cycle_is_rejected() -> anyhow::Result<()> {
    let f = fixture().await?;

    let first = {
        let cycle = f.cycle.clone();
        tokio::spawn(async move { cycle.run(CycleTrigger::Scheduled).await })
    };

    // Extraction blocks on the closed gate, so the first run stays active.
    while f.cycle.running_since().is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let err = f.cycle.run(CycleTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, EngineError::CycleInProgress { .. }));

    f.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    let summary = first.await??;
    assert_eq!(summary.trigger, CycleTrigger::Scheduled);
    assert!(f.cycle.running_since().is_none());

    // The guard is released, so a new run is accepted.
    f.cycle.run(CycleTrigger::Manual).await?;
    Ok(())
}
