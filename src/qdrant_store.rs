use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::models::{RetrievalCandidate, RetrievalOrigin};

/// Dense index over the Qdrant REST API, one collection per novel.
#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection_prefix: String,
    known_vector_sizes: Arc<RwLock<HashMap<String, usize>>>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, collection_prefix: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            collection_prefix: collection_prefix.into(),
            known_vector_sizes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn collection_name(&self, novel_slug: &str) -> String {
        format!("{}{}", self.collection_prefix, novel_slug)
    }

    pub async fn recreate_collection(&self, novel_slug: &str, vector_size: usize) -> Result<()> {
        let collection = self.collection_name(novel_slug);
        let delete_url = format!("{}/collections/{}", self.base_url, collection);
        let _ = self.client.delete(&delete_url).send().await;
        self.known_vector_sizes.write().await.remove(&collection);

        self.ensure_collection(novel_slug, vector_size).await
    }

    pub async fn ensure_collection(&self, novel_slug: &str, vector_size: usize) -> Result<()> {
        let collection = self.collection_name(novel_slug);
        {
            let known = self.known_vector_sizes.read().await;
            if known.get(&collection) == Some(&vector_size) {
                return Ok(());
            }
        }

        let create_url = format!("{}/collections/{}", self.base_url, collection);
        let payload = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .client
            .put(create_url)
            .json(&payload)
            .send()
            .await
            .context("failed to contact qdrant while creating collection")?;

        // 409 means another writer created it first.
        if response.status() != StatusCode::CONFLICT {
            response
                .error_for_status()
                .context("qdrant failed to create collection")?;
        }

        self.known_vector_sizes
            .write()
            .await
            .insert(collection, vector_size);
        Ok(())
    }

    pub async fn upsert_points(&self, novel_slug: &str, points: &[QdrantPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let vector_size = points[0].vector.len();
        self.ensure_collection(novel_slug, vector_size).await?;

        let upsert_url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url,
            self.collection_name(novel_slug)
        );
        let body = json!({ "points": points });

        self.client
            .put(upsert_url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during upsert")?
            .error_for_status()
            .context("qdrant upsert returned non-success status")?;

        Ok(())
    }

    /// Nearest chunks to `vector`, restricted to `chapter_number <= max_chapter`
    /// inside the search when a threshold is given. A novel without a
    /// collection yields no hits.
    pub async fn top_k(
        &self,
        novel_slug: &str,
        vector: &[f32],
        k: usize,
        max_chapter: Option<i64>,
    ) -> Result<Vec<RetrievalCandidate>> {
        if vector.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url,
            self.collection_name(novel_slug)
        );

        let response = self
            .client
            .post(url)
            .json(&search_body(vector, k, max_chapter))
            .send()
            .await
            .context("failed to contact qdrant during search")?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::warn!(novel = novel_slug, "qdrant collection missing, no dense hits");
            return Ok(vec![]);
        }

        let response = response
            .error_for_status()
            .context("qdrant search returned non-success status")?
            .json::<QdrantSearchResponse>()
            .await
            .context("failed to decode qdrant search response")?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                Some(RetrievalCandidate {
                    chunk_id: payload.chunk_id,
                    score: point.score,
                    origin: RetrievalOrigin::Dense,
                })
            })
            .collect())
    }
}

fn search_body(vector: &[f32], k: usize, max_chapter: Option<i64>) -> Value {
    let mut body = json!({
        "vector": vector,
        "limit": k,
        "with_payload": true,
    });
    if let Some(max) = max_chapter {
        body["filter"] = json!({
            "must": [
                { "key": "chapter_number", "range": { "lte": max } }
            ]
        });
    }
    body
}

#[derive(Debug, Clone, Serialize)]
pub struct QdrantPoint {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: QdrantPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantPayload {
    pub chunk_id: i64,
    pub chapter_number: i64,
    pub chunk_number: i64,
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantResultPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantResultPoint {
    score: f32,
    payload: Option<QdrantPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_body_without_threshold_has_no_filter() {
        let body = search_body(&[0.5, 0.25], 10, None);
        assert_eq!(body["limit"], 10);
        assert!(body.get("filter").is_none());
    }

    #[test]
    fn search_body_prefilters_on_chapter_number() {
        let body = search_body(&[0.5], 5, Some(42));
        assert_eq!(body["filter"]["must"][0]["key"], "chapter_number");
        assert_eq!(body["filter"]["must"][0]["range"]["lte"], 42);
    }

    #[test]
    fn collection_names_are_prefixed_slugs() {
        let store = QdrantStore::new("http://localhost:6333", "novel_");
        assert_eq!(store.collection_name("suprememagus"), "novel_suprememagus");
    }

    #[test]
    fn search_response_decodes_payload_ids() {
        let raw = r#"{"result":[
            {"id":7,"score":0.91,"payload":{"chunk_id":7,"chapter_number":3,"chunk_number":2}},
            {"id":8,"score":0.80,"payload":null}
        ],"status":"ok","time":0.001}"#;
        let parsed: QdrantSearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.result.len(), 2);
        assert_eq!(parsed.result[0].payload.as_ref().unwrap().chapter_number, 3);
        assert!(parsed.result[1].payload.is_none());
    }
}
