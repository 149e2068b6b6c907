//! Read-only client for the similarity store holding the reference sign
//! fingerprints.
//!
//! The store is an external Qdrant-style service; only the two queries the
//! game needs are wrapped here. Collection lifecycle and data loading are
//! handled by separate tooling.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::StoreConfig;

/// Payload field carrying the gesture label
const LABEL_FIELD: &str = "sign_name";
/// Payload field carrying the difficulty tier
const TIER_FIELD: &str = "difficulty";
/// Page size for label scans
const SCROLL_PAGE: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transport-level failure; the store may be down
    #[error("similarity store unreachable: {0}")]
    Unreachable(String),
    /// The store answered but refused the request (missing collection,
    /// dimension mismatch, malformed response)
    #[error("similarity store rejected the request: {0}")]
    Rejected(String),
}

/// One search hit: reference label plus cosine similarity in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSign {
    pub label: String,
    pub score: f32,
    pub difficulty: Option<String>,
}

/// Query surface of the similarity store
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    /// Nearest stored references whose label matches exactly
    async fn search(
        &self,
        vector: &[f32],
        label: &str,
        limit: usize,
    ) -> Result<Vec<ScoredSign>, StoreError>;

    /// All stored labels, optionally restricted to one difficulty tier.
    /// May contain duplicates (one entry per stored reference).
    async fn scan_labels(&self, tier: Option<&str>) -> Result<Vec<String>, StoreError>;
}

// --- REST client ---

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<SignPayload>,
}

#[derive(Debug, Deserialize)]
struct SignPayload {
    sign_name: Option<String>,
    difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    result: ScrollPage,
}

#[derive(Debug, Deserialize)]
struct ScrollPage {
    #[serde(default)]
    points: Vec<ScrollPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScrollPoint {
    #[serde(default)]
    payload: Option<SignPayload>,
}

/// HTTP client for a Qdrant collection of reference fingerprints
pub struct QdrantStore {
    http: reqwest::Client,
    base_url: String,
    collection: String,
}

impl QdrantStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
        }
    }

    /// Startup reachability check; failures are reported, not fatal
    pub async fn ping(&self) -> Result<(), StoreError> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Self::check_status(response).await?;
        Ok(())
    }

    fn label_filter(label: &str) -> Value {
        json!({
            "must": [{ "key": LABEL_FIELD, "match": { "value": label } }]
        })
    }

    fn tier_filter(tier: &str) -> Value {
        json!({
            "must": [{ "key": TIER_FIELD, "match": { "value": tier } }]
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected(format!("{status}: {body}")))
    }

    async fn post_json(&self, endpoint: &str, body: Value) -> Result<reqwest::Response, StoreError> {
        let url = format!(
            "{}/collections/{}/points/{}",
            self.base_url, self.collection, endpoint
        );
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Self::check_status(response).await
    }
}

#[async_trait]
impl SimilarityStore for QdrantStore {
    async fn search(
        &self,
        vector: &[f32],
        label: &str,
        limit: usize,
    ) -> Result<Vec<ScoredSign>, StoreError> {
        let body = json!({
            "vector": vector,
            "filter": Self::label_filter(label),
            "limit": limit,
            "with_payload": true,
        });
        let response = self.post_json("search", body).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Rejected(format!("malformed search response: {e}")))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| {
                let payload = hit.payload.unwrap_or(SignPayload {
                    sign_name: None,
                    difficulty: None,
                });
                ScoredSign {
                    label: payload.sign_name.unwrap_or_else(|| label.to_string()),
                    score: hit.score,
                    difficulty: payload.difficulty,
                }
            })
            .collect())
    }

    async fn scan_labels(&self, tier: Option<&str>) -> Result<Vec<String>, StoreError> {
        let filter = tier.map(Self::tier_filter);
        let mut labels = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let body = json!({
                "filter": filter,
                "limit": SCROLL_PAGE,
                "offset": offset,
                "with_payload": true,
                "with_vector": false,
            });
            let response = self.post_json("scroll", body).await?;
            let parsed: ScrollResponse = response
                .json()
                .await
                .map_err(|e| StoreError::Rejected(format!("malformed scroll response: {e}")))?;

            for point in parsed.result.points {
                if let Some(label) = point.payload.and_then(|p| p.sign_name) {
                    labels.push(label);
                }
            }

            match parsed.result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        Ok(labels)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_response_parsing() {
        let parsed: SearchResponse = serde_json::from_str(
            r#"{"result":[{"id":4,"version":0,"score":0.987,
                "payload":{"sign_name":"A","difficulty":"EASY"}}],
                "status":"ok","time":0.001}"#,
        )
        .unwrap();
        assert_eq!(parsed.result.len(), 1);
        assert!((parsed.result[0].score - 0.987).abs() < 1e-6);
        let payload = parsed.result[0].payload.as_ref().unwrap();
        assert_eq!(payload.sign_name.as_deref(), Some("A"));
        assert_eq!(payload.difficulty.as_deref(), Some("EASY"));
    }

    #[test]
    fn test_scroll_response_parsing() {
        let parsed: ScrollResponse = serde_json::from_str(
            r#"{"result":{"points":[
                {"id":0,"payload":{"sign_name":"HOLA","difficulty":"EASY"}},
                {"id":1,"payload":{"sign_name":"GRACIAS","difficulty":"HARD"}}],
                "next_page_offset":null},"status":"ok","time":0.001}"#,
        )
        .unwrap();
        assert_eq!(parsed.result.points.len(), 2);
        assert!(parsed.result.next_page_offset.is_none());
    }

    #[test]
    fn test_label_filter_shape() {
        let filter = QdrantStore::label_filter("A");
        assert_eq!(filter["must"][0]["key"], LABEL_FIELD);
        assert_eq!(filter["must"][0]["match"]["value"], "A");
    }
}
