//! Learning data quality

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{fraction, BehavioralAnalyzer};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub total_records: usize,
    /// Records with at least one accepting review
    pub validated_records: usize,
    pub validation_rate: f64,
    pub low_confidence_records: usize,
    pub low_confidence_rate: f64,
    pub needs_improvement: bool,
    pub issues: Vec<String>,
}

impl BehavioralAnalyzer {
    pub async fn assess_learning_data_quality(&self) -> EngineResult<DataQualityReport> {
        let records = self.store.list_learning_data().await?;
        if records.is_empty() {
            return Err(EngineError::insufficient("no feature learning data recorded"));
        }

        let threshold = self.config.low_confidence_threshold;
        let validation_rate = fraction(&records, |r| r.validation_count > 0);
        let low_confidence_rate = fraction(&records, |r| r.confidence_score < threshold);

        let mut issues = Vec::new();
        if validation_rate < self.config.min_validation_rate {
            issues.push(format!(
                "Only {:.0}% of learning records have been validated",
                validation_rate * 100.0
            ));
        }
        if low_confidence_rate > self.config.max_low_confidence_rate {
            issues.push(format!(
                "{:.0}% of learning records have confidence below {:.2}",
                low_confidence_rate * 100.0,
                threshold
            ));
        }

        let report = DataQualityReport {
            total_records: records.len(),
            validated_records: records.iter().filter(|r| r.validation_count > 0).count(),
            validation_rate,
            low_confidence_records: records.iter().filter(|r| r.confidence_score < threshold).count(),
            low_confidence_rate,
            needs_improvement: !issues.is_empty(),
            issues,
        };
        info!(
            "Learning data quality: {} records, validation rate {:.2}, low confidence rate {:.2}",
            report.total_records, report.validation_rate, report.low_confidence_rate
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::storage::SqliteStore;
    use crate::types::{FeatureLearningData, FeatureSource};

    #[tokio::test]
    async fn test_empty_store_is_insufficient() {
        let analyzer = BehavioralAnalyzer::new(SqliteStore::open_in_memory().unwrap(), AnalysisConfig::default());
        let err = analyzer.assess_learning_data_quality().await.unwrap_err();
        assert!(err.is_insufficient_data());
    }

    #[tokio::test]
    async fn test_flags_unvalidated_low_confidence_data() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (i, confidence) in [0.2, 0.3, 0.4, 0.9].into_iter().enumerate() {
            let mut record =
                FeatureLearningData::new(&format!("feature_{}", i), "item", FeatureSource::UserSuggested, confidence);
            if i == 3 {
                record.validation_count = 2;
            }
            store.insert_learning_data(&record).await.unwrap();
        }

        let analyzer = BehavioralAnalyzer::new(store, AnalysisConfig::default());
        let report = analyzer.assess_learning_data_quality().await.unwrap();
        assert_eq!(report.total_records, 4);
        assert_eq!(report.validated_records, 1);
        assert!((report.validation_rate - 0.25).abs() < 1e-9);
        assert_eq!(report.low_confidence_records, 3);
        assert!(report.needs_improvement);
        assert_eq!(report.issues.len(), 2);
    }

    #[tokio::test]
    async fn test_healthy_data() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..3 {
            let mut record = FeatureLearningData::new(&format!("feature_{}", i), "item", FeatureSource::CvAuto, 0.8);
            record.validation_count = 1;
            store.insert_learning_data(&record).await.unwrap();
        }
        let analyzer = BehavioralAnalyzer::new(store, AnalysisConfig::default());
        let report = analyzer.assess_learning_data_quality().await.unwrap();
        assert!(!report.needs_improvement);
        assert!(report.issues.is_empty());
    }
}
