//! Performance drift detection

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{fraction, mean, slope, BehavioralAnalyzer, Priority};
use crate::error::{EngineError, EngineResult};
use crate::types::{days_before_now, QuizResponse};

/// Windows needed before a trend means anything
const MIN_WINDOWS: usize = 3;
/// Slope below which a satisfaction decline is severe
const SEVERE_DECLINE_SLOPE: f64 = -0.2;
/// Rating at which a response counts as highly satisfied
const HIGH_SATISFACTION_RATING: u8 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftWindow {
    pub index: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub responses: usize,
    pub mean_satisfaction: f64,
    pub mean_confidence: f64,
    pub high_satisfaction_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    SatisfactionDeclining,
    ConfidenceDeclining,
    SuddenSatisfactionDrop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub kind: DriftKind,
    pub severity: Priority,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub lookback_days: i64,
    pub window_days: i64,
    pub responses_analyzed: usize,
    pub windows: Vec<DriftWindow>,
    pub satisfaction_slope: f64,
    pub confidence_slope: f64,
    pub satisfaction_declining: bool,
    pub confidence_declining: bool,
    pub sudden_satisfaction_drop: bool,
    pub performance_stable: bool,
    pub alerts: Vec<DriftAlert>,
}

impl BehavioralAnalyzer {
    /// Look for declining satisfaction or confidence over the last `days`.
    pub async fn detect_algorithm_drift(&self, days: i64) -> EngineResult<DriftReport> {
        if days <= 0 {
            return Err(EngineError::validation("drift lookback must be positive"));
        }
        let start = days_before_now(days, "drift lookback")?;
        let rated: Vec<QuizResponse> = self
            .store
            .quiz_responses_since(start)
            .await?
            .into_iter()
            .filter(|r| r.satisfaction_rating.is_some())
            .collect();

        if rated.len() < self.config.min_drift_responses {
            return Err(EngineError::insufficient(format!(
                "drift needs {} rated responses, found {}",
                self.config.min_drift_responses,
                rated.len()
            )));
        }

        let window_days = (days / self.config.target_windows.max(1)).max(self.config.min_window_days).max(1);
        let windows = bucket(&rated, start, days, window_days);
        if windows.len() < MIN_WINDOWS {
            return Err(EngineError::insufficient(format!(
                "drift needs {} non-empty windows, found {}",
                MIN_WINDOWS,
                windows.len()
            )));
        }

        let xs: Vec<f64> = windows.iter().map(|w| w.index as f64).collect();
        let satisfaction: Vec<f64> = windows.iter().map(|w| w.mean_satisfaction).collect();
        let confidence: Vec<f64> = windows.iter().map(|w| w.mean_confidence).collect();
        let satisfaction_slope = slope(&xs, &satisfaction);
        let confidence_slope = slope(&xs, &confidence);

        let threshold = self.config.trend_threshold;
        let satisfaction_declining = satisfaction_slope < -threshold;
        let confidence_declining = confidence_slope < -threshold;
        let largest_drop = satisfaction
            .windows(2)
            .map(|pair| pair[0] - pair[1])
            .fold(f64::NEG_INFINITY, f64::max);
        let sudden_satisfaction_drop = largest_drop > self.config.sudden_drop_delta;

        let mut alerts = Vec::new();
        if satisfaction_declining {
            alerts.push(DriftAlert {
                kind: DriftKind::SatisfactionDeclining,
                severity: if satisfaction_slope < SEVERE_DECLINE_SLOPE {
                    Priority::High
                } else {
                    Priority::Medium
                },
                message: format!(
                    "User satisfaction is declining ({:.3} per window)",
                    satisfaction_slope
                ),
            });
        }
        if confidence_declining {
            alerts.push(DriftAlert {
                kind: DriftKind::ConfidenceDeclining,
                severity: Priority::Medium,
                message: format!(
                    "Assignment confidence is declining ({:.3} per window)",
                    confidence_slope
                ),
            });
        }
        if sudden_satisfaction_drop {
            alerts.push(DriftAlert {
                kind: DriftKind::SuddenSatisfactionDrop,
                severity: Priority::High,
                message: format!(
                    "Mean satisfaction dropped by {:.2} between consecutive windows",
                    largest_drop
                ),
            });
        }
        for alert in &alerts {
            warn!("Drift alert ({}): {}", alert.severity, alert.message);
        }

        let report = DriftReport {
            lookback_days: days,
            window_days,
            responses_analyzed: rated.len(),
            windows,
            satisfaction_slope,
            confidence_slope,
            satisfaction_declining,
            confidence_declining,
            sudden_satisfaction_drop,
            performance_stable: !satisfaction_declining && !sudden_satisfaction_drop,
            alerts,
        };
        info!(
            "Drift check over {} windows: satisfaction slope {:.3}, confidence slope {:.3}",
            report.windows.len(),
            report.satisfaction_slope,
            report.confidence_slope
        );
        Ok(report)
    }
}

/// Group responses into fixed windows anchored at `start`, dropping empty ones.
/// A partial trailing window is folded into the last full one.
fn bucket(responses: &[QuizResponse], start: DateTime<Utc>, days: i64, window_days: i64) -> Vec<DriftWindow> {
    let length = Duration::days(window_days);
    let last_index = (days / window_days - 1).max(0);
    let mut grouped: BTreeMap<i64, Vec<&QuizResponse>> = BTreeMap::new();
    for response in responses {
        let offset = (response.completed_at - start).num_seconds().max(0);
        let index = (offset / length.num_seconds().max(1)).min(last_index);
        grouped.entry(index).or_default().push(response);
    }

    grouped
        .into_iter()
        .map(|(index, members)| {
            let ratings: Vec<u8> = members.iter().filter_map(|r| r.satisfaction_rating).collect();
            let satisfaction: Vec<f64> = ratings.iter().map(|r| *r as f64).collect();
            let confidence: Vec<f64> = members.iter().map(|r| r.confidence_score).collect();
            let window_start = start + length * index as i32;
            DriftWindow {
                index,
                start: window_start,
                end: window_start + length,
                responses: members.len(),
                mean_satisfaction: mean(&satisfaction),
                mean_confidence: mean(&confidence),
                high_satisfaction_rate: fraction(&ratings, |r| *r >= HIGH_SATISFACTION_RATING),
            }
        })
        .collect()
}
