//! Vision collaborator client
//!
//! Image analysis lives in an external service. The engine only needs the
//! tags and confidence scores it returns, so both the image source and the
//! analyzer sit behind traits.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::VisionConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{normalize_feature, ClothingItem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominantColor {
    pub color_name: String,
    pub score: f64,
}

/// What the vision service reports for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    #[serde(default)]
    pub extracted_features: Vec<String>,
    #[serde(default)]
    pub confidence_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub suggested_category: Option<String>,
    #[serde(default)]
    pub dominant_colors: Vec<DominantColor>,
}

impl VisionAnalysis {
    /// Normalized features paired with a confidence clamped to [0, 1].
    ///
    /// Features with invalid names are dropped; a feature with no reported
    /// confidence gets 0.
    pub fn features_with_confidence(&self) -> Vec<(String, f64)> {
        let mut out: BTreeMap<String, f64> = BTreeMap::new();
        for raw in &self.extracted_features {
            let feature = match normalize_feature(raw) {
                Ok(f) => f,
                Err(e) => {
                    debug!("Dropping extracted feature: {}", e);
                    continue;
                }
            };
            let confidence = self
                .confidence_scores
                .get(raw)
                .or_else(|| self.confidence_scores.get(&feature))
                .copied()
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            let entry = out.entry(feature).or_insert(confidence);
            *entry = entry.max(confidence);
        }
        out.into_iter().collect()
    }
}

/// Analyzes image bytes into feature tags.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait VisionClient: Send + Sync {
    async fn analyze(&self, image: &[u8]) -> EngineResult<VisionAnalysis>;
}

/// Resolves an item's image reference to bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, item: &ClothingItem) -> EngineResult<Vec<u8>>;
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    image: &'a str,
}

/// Posts base64 images to `{base_url}/analyze`.
pub struct HttpVisionClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVisionClient {
    pub fn new(base_url: &str, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("vision http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &VisionConfig) -> EngineResult<Option<Self>> {
        match &config.base_url {
            Some(url) => Self::new(url, Duration::from_secs(config.timeout_secs)).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl VisionClient for HttpVisionClient {
    async fn analyze(&self, image: &[u8]) -> EngineResult<VisionAnalysis> {
        let encoded = BASE64.encode(image);
        let url = format!("{}/analyze", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&AnalyzeRequest { image: &encoded })
            .send()
            .await
            .map_err(|e| EngineError::ExternalService(format!("POST {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Vision service returned {}: {}", status, body);
            return Err(EngineError::ExternalService(format!(
                "vision service returned {}",
                status
            )));
        }

        response
            .json::<VisionAnalysis>()
            .await
            .map_err(|e| EngineError::ExternalService(format!("invalid vision response: {}", e)))
    }
}

/// Loads images from http(s) URLs or local paths.
pub struct HttpImageLoader {
    client: reqwest::Client,
}

impl HttpImageLoader {
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("image http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, item: &ClothingItem) -> EngineResult<Vec<u8>> {
        let reference = item
            .image_url
            .as_deref()
            .ok_or_else(|| EngineError::validation(format!("item {} has no image", item.id)))?;

        if reference.starts_with("http://") || reference.starts_with("https://") {
            let response = self
                .client
                .get(reference)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| EngineError::ExternalService(format!("GET {}: {}", reference, e)))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| EngineError::ExternalService(format!("read {}: {}", reference, e)))?;
            Ok(bytes.to_vec())
        } else {
            tokio::fs::read(reference)
                .await
                .map_err(|e| EngineError::ExternalService(format!("read {}: {}", reference, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Gender, Slot};

    #[test]
    fn test_features_with_confidence() {
        let analysis = VisionAnalysis {
            extracted_features: vec!["Cotton".into(), "casual".into(), "bad!".into()],
            confidence_scores: BTreeMap::from([("Cotton".into(), 0.8), ("casual".into(), 1.4)]),
            ..Default::default()
        };
        let features = analysis.features_with_confidence();
        assert_eq!(
            features,
            vec![("casual".to_string(), 1.0), ("cotton".to_string(), 0.8)]
        );
    }

    #[test]
    fn test_analysis_deserializes_partial_payload() {
        let analysis: VisionAnalysis =
            serde_json::from_str(r#"{"extracted_features": ["denim"]}"#).unwrap();
        assert_eq!(analysis.extracted_features, vec!["denim".to_string()]);
        assert!(analysis.dominant_colors.is_empty());
    }

    #[tokio::test]
    async fn test_loader_reads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tee.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let item = ClothingItem::new("Tee", Gender::Male, Slot::Top, &["casual"])
            .unwrap()
            .with_image_url(path.to_str().unwrap());
        let loader = HttpImageLoader::new(Duration::from_secs(5)).unwrap();
        assert_eq!(loader.load(&item).await.unwrap(), b"jpeg".to_vec());
    }

    #[tokio::test]
    async fn test_loader_requires_image() {
        let item = ClothingItem::new("Tee", Gender::Male, Slot::Top, &["casual"]).unwrap();
        let loader = HttpImageLoader::new(Duration::from_secs(5)).unwrap();
        assert!(loader.load(&item).await.is_err());
    }
}
