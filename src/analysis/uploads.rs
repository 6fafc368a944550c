//! Post-quiz upload behavior
//!
//! Compares what users upload to their closet after the quiz with the style
//! they were assigned and the items they picked.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::{fraction, mean, std_dev, BehavioralAnalyzer};
use crate::error::{EngineError, EngineResult};
use crate::types::{QuizResponse, UserUpload};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUploadPattern {
    pub user_id: String,
    pub assigned_category: String,
    pub uploads_analyzed: usize,
    /// Fraction of uploads sharing a descriptor with the category signature
    pub style_consistency: f64,
    /// Jaccard overlap between quiz item features and upload descriptors
    pub feature_alignment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPatternReport {
    pub users_analyzed: usize,
    pub average_consistency: f64,
    pub consistency_std: f64,
    pub high_consistency_rate: f64,
    pub average_alignment: f64,
    pub alignment_std: f64,
    pub high_alignment_rate: f64,
    pub users: Vec<UserUploadPattern>,
    pub insights: Vec<String>,
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        a.intersection(b).count() as f64 / union as f64
    }
}

impl BehavioralAnalyzer {
    /// Upload consistency for one user, or for every user with uploads.
    pub async fn analyze_user_upload_patterns(
        &self,
        user_id: Option<&str>,
    ) -> EngineResult<UploadPatternReport> {
        let uploads = self.store.list_uploads(user_id).await?;
        if uploads.is_empty() {
            return Err(EngineError::insufficient("no upload data available"));
        }

        let mut by_user: BTreeMap<String, Vec<UserUpload>> = BTreeMap::new();
        for upload in uploads {
            by_user.entry(upload.user_id.clone()).or_default().push(upload);
        }

        let mut users = Vec::new();
        for (user, uploads) in by_user {
            let responses = self.store.list_quiz_responses(Some(user.as_str())).await?;
            let Some(latest) = responses.last() else {
                debug!("User {} has uploads but no quiz response", user);
                continue;
            };
            let after: Vec<&UserUpload> = uploads
                .iter()
                .filter(|u| u.uploaded_at >= latest.completed_at)
                .collect();
            if after.len() < self.config.min_uploads_per_user {
                continue;
            }
            users.push(self.user_pattern(&user, latest, &after).await?);
        }

        if users.is_empty() {
            return Err(EngineError::insufficient(format!(
                "no user has {} or more uploads after their quiz",
                self.config.min_uploads_per_user
            )));
        }

        let consistency: Vec<f64> = users.iter().map(|u| u.style_consistency).collect();
        let alignment: Vec<f64> = users.iter().map(|u| u.feature_alignment).collect();
        let high_consistency_rate = fraction(&consistency, |c| *c >= self.config.high_consistency);
        let high_alignment_rate = fraction(&alignment, |a| *a >= self.config.high_alignment);

        let mut insights = Vec::new();
        if high_consistency_rate < 0.5 {
            insights.push(
                "Uploads do not align well with assigned styles; review category features and slot weights"
                    .to_string(),
            );
        }
        if high_alignment_rate < 0.5 {
            insights.push(
                "Uploads do not match the features of quiz selections; review feature extraction and quiz items"
                    .to_string(),
            );
        }

        let report = UploadPatternReport {
            users_analyzed: users.len(),
            average_consistency: mean(&consistency),
            consistency_std: std_dev(&consistency),
            high_consistency_rate,
            average_alignment: mean(&alignment),
            alignment_std: std_dev(&alignment),
            high_alignment_rate,
            users,
            insights,
        };
        info!("Analyzed upload patterns for {} users", report.users_analyzed);
        Ok(report)
    }

    async fn user_pattern(
        &self,
        user_id: &str,
        response: &QuizResponse,
        uploads: &[&UserUpload],
    ) -> EngineResult<UserUploadPattern> {
        let signature = self
            .store
            .find_category(&response.assigned_category, Some(response.gender))
            .await?
            .map(|c| c.feature_set())
            .unwrap_or_default();

        let descriptors: Vec<BTreeSet<String>> = uploads.iter().map(|u| u.descriptors()).collect();
        let style_consistency = if signature.is_empty() {
            0.0
        } else {
            fraction(&descriptors, |d| !d.is_disjoint(&signature))
        };

        let mut quiz_features = BTreeSet::new();
        for item_id in response.selected_item_ids() {
            if let Some(item) = self.store.get_item(item_id).await? {
                quiz_features.extend(item.combined_features());
            }
        }
        let upload_features: BTreeSet<String> = descriptors.into_iter().flatten().collect();

        Ok(UserUploadPattern {
            user_id: user_id.to_string(),
            assigned_category: response.assigned_category.clone(),
            uploads_analyzed: uploads.len(),
            style_consistency,
            feature_alignment: jaccard(&quiz_features, &upload_features),
        })
    }
}
