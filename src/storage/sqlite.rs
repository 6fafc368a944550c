//! SQLite-backed store for the learning engine

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{format_ts, parse_ts};
use crate::error::{EngineError, EngineResult};
use crate::types::{
    ClothingItem, FeatureCorrelation, FeatureLearningData, FeatureSource, Gender, QuizResponse,
    StyleAssignmentFeedback, StyleCategory, UserUpload,
};

const ITEM_COLUMNS: &str = "id, name, gender, slot, image_url, features, auto_extracted_features, \
     feature_confidence_scores, selection_count, satisfaction_score, is_active, created_at";

const CATEGORY_COLUMNS: &str =
    "id, name, gender, features, ai_theme_prompt, description, is_active";

const RESPONSE_COLUMNS: &str = "id, user_id, gender, selections, calculated_scores, \
     assigned_category, hybrid_categories, confidence_score, satisfaction_rating, feedback_text, \
     completed_at";

const LEARNING_COLUMNS: &str = "id, feature_name, item_id, source, confidence_score, \
     validation_count, rejection_count, created_at, updated_at";

const CORRELATION_COLUMNS: &str = "feature_a, feature_b, co_occurrence_count, total_occurrences, \
     correlation_strength, updated_at";

const FEEDBACK_COLUMNS: &str = "id, quiz_response_id, user_id, accuracy_rating, feedback_type, \
     preferred_style, feedback_text, feature_feedback, created_at";

const UPLOAD_COLUMNS: &str = "id, user_id, category, color, tags, uploaded_at";

/// Everything written by one satisfaction report.
#[derive(Debug, Clone)]
pub struct SatisfactionUpdate {
    pub feedback: StyleAssignmentFeedback,
    /// Overall rating attached to the quiz response
    pub overall_rating: Option<u8>,
    pub feedback_text: Option<String>,
    /// Item-specific ratings, keyed by item id
    pub item_ratings: BTreeMap<String, u8>,
}

/// Counts of what a satisfaction report changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SatisfactionWrite {
    pub items_updated: usize,
    pub features_validated: usize,
    pub features_rejected: usize,
}

/// Row counts per table
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub items: usize,
    pub active_items: usize,
    pub categories: usize,
    pub quiz_responses: usize,
    pub learning_records: usize,
    pub correlations: usize,
    pub feedback: usize,
    pub uploads: usize,
}

/// SQLite store shared by all engines
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub async fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| EngineError::Storage(format!("create {}: {}", parent.display(), e)))?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;

        debug!("Opened store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> EngineResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS clothing_items (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                gender TEXT NOT NULL CHECK (gender IN ('female', 'male')),
                slot TEXT NOT NULL CHECK (slot IN ('top', 'bottom', 'shoes', 'layering', 'accessory', 'complete_outfit')),
                image_url TEXT,
                features TEXT NOT NULL DEFAULT '[]',
                auto_extracted_features TEXT NOT NULL DEFAULT '[]',
                feature_confidence_scores TEXT NOT NULL DEFAULT '{}',
                selection_count INTEGER NOT NULL DEFAULT 0 CHECK (selection_count >= 0),
                satisfaction_score REAL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS style_categories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                gender TEXT NOT NULL CHECK (gender IN ('female', 'male')),
                features TEXT NOT NULL DEFAULT '[]',
                ai_theme_prompt TEXT,
                description TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                UNIQUE (name, gender)
            );

            CREATE TABLE IF NOT EXISTS quiz_responses (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                gender TEXT NOT NULL,
                selections TEXT NOT NULL,
                calculated_scores TEXT NOT NULL,
                assigned_category TEXT NOT NULL,
                hybrid_categories TEXT NOT NULL DEFAULT '[]',
                confidence_score REAL NOT NULL,
                satisfaction_rating INTEGER CHECK (satisfaction_rating BETWEEN 1 AND 5),
                feedback_text TEXT,
                completed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feature_learning_data (
                id TEXT PRIMARY KEY,
                feature_name TEXT NOT NULL CHECK (length(feature_name) > 0),
                item_id TEXT NOT NULL,
                source TEXT NOT NULL CHECK (source IN ('manual', 'cv_auto', 'user_suggested', 'algorithm_discovered')),
                confidence_score REAL NOT NULL CHECK (confidence_score >= 0 AND confidence_score <= 1),
                validation_count INTEGER NOT NULL DEFAULT 0 CHECK (validation_count >= 0),
                rejection_count INTEGER NOT NULL DEFAULT 0 CHECK (rejection_count >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feature_correlations (
                feature_a TEXT NOT NULL,
                feature_b TEXT NOT NULL,
                co_occurrence_count INTEGER NOT NULL CHECK (co_occurrence_count >= 0),
                total_occurrences INTEGER NOT NULL CHECK (total_occurrences >= co_occurrence_count),
                correlation_strength REAL NOT NULL CHECK (correlation_strength >= 0 AND correlation_strength <= 1),
                updated_at TEXT NOT NULL,
                PRIMARY KEY (feature_a, feature_b),
                CHECK (feature_a < feature_b)
            );

            CREATE TABLE IF NOT EXISTS style_assignment_feedback (
                id TEXT PRIMARY KEY,
                quiz_response_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                accuracy_rating INTEGER NOT NULL CHECK (accuracy_rating BETWEEN 1 AND 5),
                feedback_type TEXT NOT NULL CHECK (feedback_type IN ('too_broad', 'too_narrow', 'completely_wrong', 'mostly_right', 'perfect')),
                preferred_style TEXT,
                feedback_text TEXT,
                feature_feedback TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_uploads (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                category TEXT NOT NULL,
                color TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                uploaded_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_learning_cv_auto
                ON feature_learning_data(item_id, feature_name) WHERE source = 'cv_auto';
            CREATE INDEX IF NOT EXISTS idx_learning_item ON feature_learning_data(item_id);
            CREATE INDEX IF NOT EXISTS idx_learning_created ON feature_learning_data(created_at);
            CREATE INDEX IF NOT EXISTS idx_responses_completed ON quiz_responses(completed_at);
            CREATE INDEX IF NOT EXISTS idx_responses_user ON quiz_responses(user_id);
            CREATE INDEX IF NOT EXISTS idx_feedback_response ON style_assignment_feedback(quiz_response_id);
            CREATE INDEX IF NOT EXISTS idx_uploads_user ON user_uploads(user_id);
            "#,
        )?;
        Ok(())
    }

    // ---- catalog -------------------------------------------------------

    pub async fn insert_item(&self, item: &ClothingItem) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO clothing_items ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                ITEM_COLUMNS
            ),
            params![
                item.id,
                item.name,
                item.gender.as_str(),
                item.slot.as_str(),
                item.image_url,
                serde_json::to_string(&item.features)?,
                serde_json::to_string(&item.auto_extracted_features)?,
                serde_json::to_string(&item.feature_confidence_scores)?,
                item.selection_count,
                item.satisfaction_score,
                item.is_active,
                format_ts(&item.created_at),
            ],
        )?;
        Ok(())
    }

    pub async fn get_item(&self, id: &str) -> EngineResult<Option<ClothingItem>> {
        let conn = self.conn.lock().await;
        Ok(load_item(&conn, id)?)
    }

    pub async fn list_items(&self, active_only: bool) -> EngineResult<Vec<ClothingItem>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM clothing_items WHERE (?1 = 0 OR is_active = 1) ORDER BY created_at, id",
            ITEM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![active_only], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Active items that have never been through feature extraction, oldest first.
    pub async fn items_needing_extraction(&self, limit: usize) -> EngineResult<Vec<ClothingItem>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM clothing_items
             WHERE is_active = 1 AND auto_extracted_features = '[]'
             ORDER BY created_at, id LIMIT ?1",
            ITEM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![limit as i64], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub async fn set_item_active(&self, id: &str, active: bool) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE clothing_items SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        if changed == 0 {
            return Err(EngineError::not_found("clothing item", id));
        }
        Ok(())
    }

    pub async fn insert_category(&self, category: &StyleCategory) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO style_categories ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                CATEGORY_COLUMNS
            ),
            params![
                category.id,
                category.name,
                category.gender.as_str(),
                serde_json::to_string(&category.features)?,
                category.ai_theme_prompt,
                category.description,
                category.is_active,
            ],
        )?;
        Ok(())
    }

    pub async fn list_categories(
        &self,
        gender: Option<Gender>,
        active_only: bool,
    ) -> EngineResult<Vec<StyleCategory>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM style_categories
             WHERE (?1 IS NULL OR gender = ?1) AND (?2 = 0 OR is_active = 1)
             ORDER BY name, gender",
            CATEGORY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let categories = stmt
            .query_map(params![gender.map(|g| g.as_str()), active_only], category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Look up a category by name, optionally restricted to one gender.
    pub async fn find_category(
        &self,
        name: &str,
        gender: Option<Gender>,
    ) -> EngineResult<Option<StyleCategory>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM style_categories
             WHERE name = ?1 AND (?2 IS NULL OR gender = ?2)
             ORDER BY is_active DESC LIMIT 1",
            CATEGORY_COLUMNS
        );
        let category = conn
            .query_row(&sql, params![name, gender.map(|g| g.as_str())], category_from_row)
            .optional()?;
        Ok(category)
    }

    // ---- quiz responses ------------------------------------------------

    /// Persist a response and bump the selection count of every selected item.
    pub async fn record_quiz_submission(&self, response: &QuizResponse) -> EngineResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO quiz_responses ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                RESPONSE_COLUMNS
            ),
            params![
                response.id,
                response.user_id,
                response.gender.as_str(),
                serde_json::to_string(&response.selections)?,
                serde_json::to_string(&response.calculated_scores)?,
                response.assigned_category,
                serde_json::to_string(&response.hybrid_categories)?,
                response.confidence_score,
                response.satisfaction_rating,
                response.feedback_text,
                format_ts(&response.completed_at),
            ],
        )?;

        for item_id in response.selected_item_ids() {
            let changed = tx.execute(
                "UPDATE clothing_items SET selection_count = selection_count + 1 WHERE id = ?1",
                params![item_id],
            )?;
            if changed == 0 {
                return Err(EngineError::not_found("clothing item", item_id.as_str()));
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub async fn get_quiz_response(&self, id: &str) -> EngineResult<Option<QuizResponse>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM quiz_responses WHERE id = ?1", RESPONSE_COLUMNS);
        Ok(conn.query_row(&sql, params![id], response_from_row).optional()?)
    }

    /// Responses completed at or after `since`, oldest first.
    pub async fn quiz_responses_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<QuizResponse>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM quiz_responses WHERE completed_at >= ?1 ORDER BY completed_at, id",
            RESPONSE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let responses = stmt
            .query_map(params![format_ts(&since)], response_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(responses)
    }

    pub async fn list_quiz_responses(&self, user_id: Option<&str>) -> EngineResult<Vec<QuizResponse>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM quiz_responses WHERE (?1 IS NULL OR user_id = ?1)
             ORDER BY completed_at, id",
            RESPONSE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let responses = stmt
            .query_map(params![user_id], response_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(responses)
    }

    // ---- learning data -------------------------------------------------

    pub async fn insert_learning_data(&self, data: &FeatureLearningData) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        insert_learning(&conn, data)?;
        Ok(())
    }

    pub async fn get_learning_data(&self, id: &str) -> EngineResult<Option<FeatureLearningData>> {
        let conn = self.conn.lock().await;
        Ok(load_learning(&conn, id)?)
    }

    pub async fn list_learning_data(&self) -> EngineResult<Vec<FeatureLearningData>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM feature_learning_data ORDER BY created_at, id",
            LEARNING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], learning_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Records for one item/feature pair, optionally filtered by source.
    pub async fn find_learning_data(
        &self,
        item_id: &str,
        feature_name: &str,
        source: Option<FeatureSource>,
    ) -> EngineResult<Vec<FeatureLearningData>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM feature_learning_data
             WHERE item_id = ?1 AND feature_name = ?2 AND (?3 IS NULL OR source = ?3)
             ORDER BY created_at, id",
            LEARNING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![item_id, feature_name, source.map(|s| s.as_str())],
                learning_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Pending records (no reviews) created before `cutoff`.
    pub async fn pending_learning_data_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> EngineResult<Vec<FeatureLearningData>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM feature_learning_data
             WHERE validation_count = 0 AND rejection_count = 0 AND created_at < ?1
             ORDER BY created_at, id",
            LEARNING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![format_ts(&cutoff)], learning_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Increment one review counter; an acceptance also adds the feature to the
    /// item's auto-extracted set.
    pub async fn apply_validation(
        &self,
        id: &str,
        is_valid: bool,
    ) -> EngineResult<FeatureLearningData> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let mut record =
            load_learning(&tx, id)?.ok_or_else(|| EngineError::not_found("learning data", id))?;
        let now = Utc::now();
        if is_valid {
            record.validation_count += 1;
        } else {
            record.rejection_count += 1;
        }
        record.updated_at = now;

        tx.execute(
            "UPDATE feature_learning_data
             SET validation_count = ?2, rejection_count = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                record.id,
                record.validation_count,
                record.rejection_count,
                format_ts(&now)
            ],
        )?;

        if is_valid {
            let mut item = load_item(&tx, &record.item_id)?
                .ok_or_else(|| EngineError::not_found("clothing item", record.item_id.as_str()))?;
            if item.add_auto_feature(&record.feature_name, None) {
                save_item_learning_state(&tx, &item)?;
            }
        }

        tx.commit()?;
        Ok(record)
    }

    /// Persist one item's extraction output: upsert `cv_auto` records and union
    /// the features into the item. Returns how many features were new to the item.
    pub async fn record_extraction(
        &self,
        item_id: &str,
        features: &[(String, f64)],
    ) -> EngineResult<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let mut item = load_item(&tx, item_id)?
            .ok_or_else(|| EngineError::not_found("clothing item", item_id))?;
        let now = format_ts(&Utc::now());
        let mut added = 0;

        for (feature, confidence) in features {
            tx.execute(
                "INSERT INTO feature_learning_data
                 (id, feature_name, item_id, source, confidence_score, validation_count,
                  rejection_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'cv_auto', ?4, 0, 0, ?5, ?5)
                 ON CONFLICT (item_id, feature_name) WHERE source = 'cv_auto'
                 DO UPDATE SET confidence_score = excluded.confidence_score,
                               updated_at = excluded.updated_at",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    feature,
                    item_id,
                    confidence,
                    now
                ],
            )?;
            if item.add_auto_feature(feature, Some(*confidence)) {
                added += 1;
            }
        }

        save_item_learning_state(&tx, &item)?;
        tx.commit()?;
        Ok(added)
    }

    /// Delete unreviewed, low-confidence records older than `cutoff`.
    pub async fn delete_stale_learning_data(
        &self,
        cutoff: DateTime<Utc>,
        min_reviews: u32,
        min_confidence: f64,
    ) -> EngineResult<usize> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM feature_learning_data
             WHERE created_at < ?1
               AND (validation_count + rejection_count) < ?2
               AND confidence_score < ?3",
            params![format_ts(&cutoff), min_reviews, min_confidence],
        )?;
        Ok(deleted)
    }

    // ---- correlations --------------------------------------------------

    /// Upsert a full mining pass in one transaction.
    pub async fn upsert_correlations(&self, correlations: &[FeatureCorrelation]) -> EngineResult<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO feature_correlations
                 (feature_a, feature_b, co_occurrence_count, total_occurrences,
                  correlation_strength, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (feature_a, feature_b) DO UPDATE SET
                    co_occurrence_count = excluded.co_occurrence_count,
                    total_occurrences = excluded.total_occurrences,
                    correlation_strength = excluded.correlation_strength,
                    updated_at = excluded.updated_at",
            )?;
            for c in correlations {
                stmt.execute(params![
                    c.feature_a,
                    c.feature_b,
                    c.co_occurrence_count,
                    c.total_occurrences,
                    c.correlation_strength,
                    format_ts(&c.updated_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(correlations.len())
    }

    pub async fn list_correlations(&self) -> EngineResult<Vec<FeatureCorrelation>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM feature_correlations
             ORDER BY correlation_strength DESC, feature_a, feature_b",
            CORRELATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let correlations = stmt
            .query_map([], correlation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(correlations)
    }

    pub async fn correlations_for(
        &self,
        feature: &str,
        min_strength: f64,
    ) -> EngineResult<Vec<FeatureCorrelation>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM feature_correlations
             WHERE (feature_a = ?1 OR feature_b = ?1) AND correlation_strength >= ?2
             ORDER BY correlation_strength DESC, feature_a, feature_b",
            CORRELATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let correlations = stmt
            .query_map(params![feature, min_strength], correlation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(correlations)
    }

    // ---- feedback ------------------------------------------------------

    /// Persist feedback and fold its ratings into the response, the selected
    /// items and the matching learning records.
    pub async fn record_satisfaction(
        &self,
        update: &SatisfactionUpdate,
    ) -> EngineResult<SatisfactionWrite> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let feedback = &update.feedback;

        let response_sql = format!("SELECT {} FROM quiz_responses WHERE id = ?1", RESPONSE_COLUMNS);
        let response = tx
            .query_row(&response_sql, params![feedback.quiz_response_id], response_from_row)
            .optional()?
            .ok_or_else(|| {
                EngineError::not_found("quiz response", feedback.quiz_response_id.as_str())
            })?;

        tx.execute(
            &format!(
                "INSERT INTO style_assignment_feedback ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                FEEDBACK_COLUMNS
            ),
            params![
                feedback.id,
                feedback.quiz_response_id,
                feedback.user_id,
                feedback.accuracy_rating,
                feedback.feedback_type.as_str(),
                feedback.preferred_style,
                feedback.feedback_text,
                serde_json::to_string(&feedback.feature_feedback)?,
                format_ts(&feedback.created_at),
            ],
        )?;

        if update.overall_rating.is_some() || update.feedback_text.is_some() {
            tx.execute(
                "UPDATE quiz_responses
                 SET satisfaction_rating = COALESCE(?2, satisfaction_rating),
                     feedback_text = COALESCE(?3, feedback_text)
                 WHERE id = ?1",
                params![response.id, update.overall_rating, update.feedback_text],
            )?;
        }

        let mut write = SatisfactionWrite::default();

        for item_id in response.selected_item_ids() {
            let rating = update
                .item_ratings
                .get(item_id)
                .copied()
                .or(update.overall_rating)
                .unwrap_or(feedback.accuracy_rating);
            match load_item(&tx, item_id)? {
                Some(mut item) => {
                    item.update_satisfaction_score(rating);
                    save_item_learning_state(&tx, &item)?;
                    write.items_updated += 1;
                }
                None => debug!("Selected item {} no longer exists, skipping rating", item_id),
            }
        }

        let now = format_ts(&Utc::now());
        for (item_id, features) in &feedback.feature_feedback {
            for (feature, accurate) in features {
                let column = if *accurate { "validation_count" } else { "rejection_count" };
                let changed = tx.execute(
                    &format!(
                        "UPDATE feature_learning_data SET {col} = {col} + 1, updated_at = ?3
                         WHERE item_id = ?1 AND feature_name = ?2",
                        col = column
                    ),
                    params![item_id, feature, now],
                )?;
                if changed == 0 {
                    continue;
                }
                if *accurate {
                    write.features_validated += changed;
                    if let Some(mut item) = load_item(&tx, item_id)? {
                        if item.add_auto_feature(feature, None) {
                            save_item_learning_state(&tx, &item)?;
                        }
                    }
                } else {
                    write.features_rejected += changed;
                }
            }
        }

        tx.commit()?;
        Ok(write)
    }

    pub async fn feedback_since(
        &self,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<StyleAssignmentFeedback>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM style_assignment_feedback WHERE created_at >= ?1
             ORDER BY created_at, id",
            FEEDBACK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let feedback = stmt
            .query_map(params![format_ts(&since)], feedback_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(feedback)
    }

    pub async fn feedback_for_response(
        &self,
        quiz_response_id: &str,
    ) -> EngineResult<Vec<StyleAssignmentFeedback>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM style_assignment_feedback WHERE quiz_response_id = ?1
             ORDER BY created_at, id",
            FEEDBACK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let feedback = stmt
            .query_map(params![quiz_response_id], feedback_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(feedback)
    }

    // ---- uploads -------------------------------------------------------

    pub async fn insert_upload(&self, upload: &UserUpload) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("INSERT INTO user_uploads ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", UPLOAD_COLUMNS),
            params![
                upload.id,
                upload.user_id,
                upload.category,
                upload.color,
                serde_json::to_string(&upload.tags)?,
                format_ts(&upload.uploaded_at),
            ],
        )?;
        Ok(())
    }

    pub async fn list_uploads(&self, user_id: Option<&str>) -> EngineResult<Vec<UserUpload>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM user_uploads WHERE (?1 IS NULL OR user_id = ?1)
             ORDER BY uploaded_at, id",
            UPLOAD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let uploads = stmt
            .query_map(params![user_id], upload_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(uploads)
    }

    pub async fn stats(&self) -> EngineResult<StoreStats> {
        let conn = self.conn.lock().await;
        let count = |sql: &str| -> rusqlite::Result<usize> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as usize)
        };
        Ok(StoreStats {
            items: count("SELECT COUNT(*) FROM clothing_items")?,
            active_items: count("SELECT COUNT(*) FROM clothing_items WHERE is_active = 1")?,
            categories: count("SELECT COUNT(*) FROM style_categories")?,
            quiz_responses: count("SELECT COUNT(*) FROM quiz_responses")?,
            learning_records: count("SELECT COUNT(*) FROM feature_learning_data")?,
            correlations: count("SELECT COUNT(*) FROM feature_correlations")?,
            feedback: count("SELECT COUNT(*) FROM style_assignment_feedback")?,
            uploads: count("SELECT COUNT(*) FROM user_uploads")?,
        })
    }
}

// ---- row helpers -------------------------------------------------------

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e))
}

fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = EngineError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ClothingItem> {
    Ok(ClothingItem {
        id: row.get(0)?,
        name: row.get(1)?,
        gender: enum_col(row, 2)?,
        slot: enum_col(row, 3)?,
        image_url: row.get(4)?,
        features: json_col(row, 5)?,
        auto_extracted_features: json_col(row, 6)?,
        feature_confidence_scores: json_col(row, 7)?,
        selection_count: row.get(8)?,
        satisfaction_score: row.get(9)?,
        is_active: row.get(10)?,
        created_at: ts_col(row, 11)?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<StyleCategory> {
    Ok(StyleCategory {
        id: row.get(0)?,
        name: row.get(1)?,
        gender: enum_col(row, 2)?,
        features: json_col(row, 3)?,
        ai_theme_prompt: row.get(4)?,
        description: row.get(5)?,
        is_active: row.get(6)?,
    })
}

fn response_from_row(row: &Row<'_>) -> rusqlite::Result<QuizResponse> {
    Ok(QuizResponse {
        id: row.get(0)?,
        user_id: row.get(1)?,
        gender: enum_col(row, 2)?,
        selections: json_col(row, 3)?,
        calculated_scores: json_col(row, 4)?,
        assigned_category: row.get(5)?,
        hybrid_categories: json_col(row, 6)?,
        confidence_score: row.get(7)?,
        satisfaction_rating: row.get(8)?,
        feedback_text: row.get(9)?,
        completed_at: ts_col(row, 10)?,
    })
}

fn learning_from_row(row: &Row<'_>) -> rusqlite::Result<FeatureLearningData> {
    Ok(FeatureLearningData {
        id: row.get(0)?,
        feature_name: row.get(1)?,
        item_id: row.get(2)?,
        source: enum_col(row, 3)?,
        confidence_score: row.get(4)?,
        validation_count: row.get(5)?,
        rejection_count: row.get(6)?,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
    })
}

fn correlation_from_row(row: &Row<'_>) -> rusqlite::Result<FeatureCorrelation> {
    Ok(FeatureCorrelation {
        feature_a: row.get(0)?,
        feature_b: row.get(1)?,
        co_occurrence_count: row.get(2)?,
        total_occurrences: row.get(3)?,
        correlation_strength: row.get(4)?,
        updated_at: ts_col(row, 5)?,
    })
}

fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<StyleAssignmentFeedback> {
    Ok(StyleAssignmentFeedback {
        id: row.get(0)?,
        quiz_response_id: row.get(1)?,
        user_id: row.get(2)?,
        accuracy_rating: row.get(3)?,
        feedback_type: enum_col(row, 4)?,
        preferred_style: row.get(5)?,
        feedback_text: row.get(6)?,
        feature_feedback: json_col(row, 7)?,
        created_at: ts_col(row, 8)?,
    })
}

fn upload_from_row(row: &Row<'_>) -> rusqlite::Result<UserUpload> {
    Ok(UserUpload {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category: row.get(2)?,
        color: row.get(3)?,
        tags: json_col(row, 4)?,
        uploaded_at: ts_col(row, 5)?,
    })
}

fn load_item(conn: &Connection, id: &str) -> rusqlite::Result<Option<ClothingItem>> {
    let sql = format!("SELECT {} FROM clothing_items WHERE id = ?1", ITEM_COLUMNS);
    conn.query_row(&sql, params![id], item_from_row).optional()
}

fn load_learning(conn: &Connection, id: &str) -> rusqlite::Result<Option<FeatureLearningData>> {
    let sql = format!("SELECT {} FROM feature_learning_data WHERE id = ?1", LEARNING_COLUMNS);
    conn.query_row(&sql, params![id], learning_from_row).optional()
}

fn insert_learning(conn: &Connection, data: &FeatureLearningData) -> EngineResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO feature_learning_data ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            LEARNING_COLUMNS
        ),
        params![
            data.id,
            data.feature_name,
            data.item_id,
            data.source.as_str(),
            data.confidence_score,
            data.validation_count,
            data.rejection_count,
            format_ts(&data.created_at),
            format_ts(&data.updated_at),
        ],
    )?;
    Ok(())
}

/// Write back the fields the learning engine mutates.
fn save_item_learning_state(conn: &Connection, item: &ClothingItem) -> EngineResult<()> {
    conn.execute(
        "UPDATE clothing_items
         SET auto_extracted_features = ?2, feature_confidence_scores = ?3, satisfaction_score = ?4
         WHERE id = ?1",
        params![
            item.id,
            serde_json::to_string(&item.auto_extracted_features)?,
            serde_json::to_string(&item.feature_confidence_scores)?,
            item.satisfaction_score,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeedbackType, Slot};
    use chrono::Duration;

    async fn store_with_item() -> (SqliteStore, ClothingItem) {
        let store = SqliteStore::open_in_memory().unwrap();
        let item = ClothingItem::new("Linen Shirt", Gender::Female, Slot::Top, &["casual"]).unwrap();
        store.insert_item(&item).await.unwrap();
        (store, item)
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("data").join("test.db")).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.items, 0);
    }

    #[tokio::test]
    async fn test_item_round_trip() {
        let (store, item) = store_with_item().await;
        let loaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.features, vec!["casual".to_string()]);
        assert_eq!(loaded.created_at, item.created_at);
        assert!(store.get_item("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_acceptance_adds_feature_once() {
        let (store, item) = store_with_item().await;
        let data = FeatureLearningData::new("cotton", &item.id, FeatureSource::UserSuggested, 0.8);
        store.insert_learning_data(&data).await.unwrap();

        store.apply_validation(&data.id, true).await.unwrap();
        let updated = store.apply_validation(&data.id, true).await.unwrap();
        assert_eq!(updated.validation_count, 2);

        let loaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.auto_extracted_features, vec!["cotton".to_string()]);
    }

    #[tokio::test]
    async fn test_rejection_keeps_features() {
        let (store, item) = store_with_item().await;
        let data = FeatureLearningData::new("casual", &item.id, FeatureSource::Manual, 0.9);
        store.insert_learning_data(&data).await.unwrap();

        let updated = store.apply_validation(&data.id, false).await.unwrap();
        assert_eq!(updated.rejection_count, 1);
        assert_eq!(updated.validation_count, 0);

        let loaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert!(loaded.has_feature("casual"));
    }

    #[tokio::test]
    async fn test_extraction_upserts_cv_auto() {
        let (store, item) = store_with_item().await;
        let added = store
            .record_extraction(&item.id, &[("cotton".into(), 0.4), ("blue".into(), 0.9)])
            .await
            .unwrap();
        assert_eq!(added, 2);

        let added = store
            .record_extraction(&item.id, &[("cotton".into(), 0.7)])
            .await
            .unwrap();
        assert_eq!(added, 0);

        let records = store
            .find_learning_data(&item.id, "cotton", Some(FeatureSource::CvAuto))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].confidence_score, 0.7);
    }

    #[tokio::test]
    async fn test_correlation_check_constraints() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut bad = FeatureCorrelation::new("a", "b", 1, 2);
        std::mem::swap(&mut bad.feature_a, &mut bad.feature_b);
        assert!(store.upsert_correlations(&[bad]).await.is_err());

        let good = FeatureCorrelation::new("casual", "cotton", 4, 5);
        store.upsert_correlations(&[good.clone()]).await.unwrap();
        store.upsert_correlations(&[good]).await.unwrap();
        assert_eq!(store.list_correlations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_learning_data_deleted() {
        let (store, item) = store_with_item().await;
        let mut old = FeatureLearningData::new("boho", &item.id, FeatureSource::CvAuto, 0.3);
        old.created_at = Utc::now() - Duration::days(120);
        store.insert_learning_data(&old).await.unwrap();
        let fresh = FeatureLearningData::new("boho", &item.id, FeatureSource::UserSuggested, 0.3);
        store.insert_learning_data(&fresh).await.unwrap();

        let deleted = store
            .delete_stale_learning_data(Utc::now() - Duration::days(90), 3, 0.6)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_learning_data(&fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_satisfaction_requires_response() {
        let store = SqliteStore::open_in_memory().unwrap();
        let update = SatisfactionUpdate {
            feedback: StyleAssignmentFeedback {
                id: "f1".into(),
                quiz_response_id: "nope".into(),
                user_id: "u1".into(),
                accuracy_rating: 4,
                feedback_type: FeedbackType::MostlyRight,
                preferred_style: None,
                feedback_text: None,
                feature_feedback: BTreeMap::new(),
                created_at: Utc::now(),
            },
            overall_rating: Some(4),
            feedback_text: None,
            item_ratings: BTreeMap::new(),
        };
        let err = store.record_satisfaction(&update).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
        assert_eq!(store.stats().await.unwrap().feedback, 0);
    }
}
