//! Style Learning - style classification and continuous-learning engine
//!
//! Scores a user's clothing picks against feature-based style categories and
//! keeps improving the feature data behind that scoring:
//! - Weighted per-slot scoring with hybrid style detection
//! - Feature suggestions, validation and vision-based extraction
//! - Pattern and correlation mining over the catalog
//! - Behavioral analysis of accuracy, uploads, drift and data quality
//! - A scheduled daily improvement cycle
//!
//! # Example
//!
//! ```ignore
//! use style_learning::{Gender, QuizProcessor, ScoreEngine, Slot, SqliteStore};
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::open("style.db").await?;
//!     let processor = QuizProcessor::new(store, ScoreEngine::default());
//!     let selections = BTreeMap::from([(Slot::Top, "item-id".to_string())]);
//!     let response = processor.process_quiz_submission("user", Gender::Female, selections).await?;
//!     println!("{}", response.assigned_category);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;
pub mod types;
pub mod config;
pub mod storage;
pub mod vision;

// Engines
pub mod scoring;
pub mod learning;
pub mod analysis;
pub mod cycle;
pub mod scheduler;

pub mod cli;

// Re-export commonly used types for convenience
pub use error::{EngineError, EngineResult};

pub use types::{
    ClothingItem,
    FeatureCorrelation,
    FeatureLearningData,
    FeatureSource,
    FeedbackType,
    Gender,
    QuizResponse,
    Slot,
    StyleAssignmentFeedback,
    StyleCategory,
    UserUpload,
};

pub use config::Config;
pub use storage::SqliteStore;

pub use scoring::{QuizProcessor, ScoreEngine, StyleAssignment};
pub use learning::{FeatureLearningEngine, SatisfactionData};
pub use analysis::{BehavioralAnalyzer, Priority, Recommendation};
pub use cycle::{CycleSummary, CycleTrigger, ImprovementCycle};
pub use scheduler::{CycleSchedule, CycleScheduler};
pub use vision::{HttpImageLoader, HttpVisionClient, ImageLoader, VisionAnalysis, VisionClient};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
pub const NAME: &str = env!("CARGO_PKG_NAME");
