//! Feature learning
//!
//! Tracks where each item feature came from and how users reviewed it, mines
//! the catalog for co-occurring and frequent feature groups, and folds vision
//! output and satisfaction feedback back into the items.

mod correlations;
mod engine;
mod extraction;
mod feedback;
mod metrics;
mod patterns;

pub use correlations::{mine_correlations, CorrelationInsight, CorrelationPass};
pub use engine::{FeatureLearningEngine, PendingValidationReport};
pub use extraction::{BatchExtractionReport, ExtractionResult};
pub use feedback::{SatisfactionData, SatisfactionOutcome};
pub use metrics::LearningMetrics;
pub use patterns::{discover_patterns, pattern_suggestions, FeaturePattern, PatternSuggestion};
