//! Behavioral analysis
//!
//! Measures how well assignments hold up against what users report and do
//! afterwards, watches for drift, and turns the findings into ranked
//! recommendations.

mod accuracy;
mod drift;
mod quality;
mod recommendations;
mod uploads;

pub use accuracy::{AccuracyReport, CategoryAccuracy};
pub use drift::{DriftAlert, DriftKind, DriftReport, DriftWindow};
pub use quality::DataQualityReport;
pub use recommendations::{Recommendation, RecommendationCategory};
pub use uploads::{UploadPatternReport, UserUploadPattern};

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::storage::SqliteStore;

/// Priority level, ordered so `Critical` sorts highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Runs the behavioral analyses over store snapshots
pub struct BehavioralAnalyzer {
    store: SqliteStore,
    config: AnalysisConfig,
}

impl BehavioralAnalyzer {
    pub fn new(store: SqliteStore, config: AnalysisConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Least-squares slope of `ys` over `xs`; 0 when x has no spread.
pub(crate) fn slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mx = mean(&xs[..n]);
    let my = mean(&ys[..n]);
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n {
        num += (xs[i] - mx) * (ys[i] - my);
        den += (xs[i] - mx).powi(2);
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

pub(crate) fn fraction<T>(values: &[T], pred: impl Fn(&T) -> bool) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().filter(|v| pred(v)).count() as f64 / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let mut p = vec![Priority::Medium, Priority::Critical, Priority::Low, Priority::High];
        p.sort_by(|a, b| b.cmp(a));
        assert_eq!(p, vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]);
        assert_eq!(Priority::Critical.to_string(), "critical");
    }

    #[test]
    fn test_stats_helpers() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0);
        assert!((slope(&[0.0, 1.0, 2.0], &[5.0, 4.0, 3.0]) + 1.0).abs() < 1e-9);
        assert_eq!(slope(&[1.0], &[1.0]), 0.0);
        assert_eq!(fraction(&[1, 4, 5, 2], |r| *r >= 4), 0.5);
    }
}
