use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::db::Database;
use crate::fusion::{fuse, resolve, PassThroughReranker, Reranker};
use crate::models::{Novel, StoredChunk};
use crate::ollama::OllamaClient;
use crate::qdrant_store::QdrantStore;
use crate::tantivy_store::TantivyStore;

/// Instruction prefix the embedding model expects on search queries.
pub const QUERY_PROMPT: &str = "Represent this sentence for searching relevant passages: ";

#[derive(Clone)]
pub struct Retriever {
    db: Database,
    qdrant: QdrantStore,
    tantivy: TantivyStore,
    ollama: OllamaClient,
    embedding_model: String,
    reranker: Arc<dyn Reranker>,
}

impl Retriever {
    pub fn new(
        db: Database,
        qdrant: QdrantStore,
        tantivy: TantivyStore,
        ollama: OllamaClient,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            db,
            qdrant,
            tantivy,
            ollama,
            embedding_model: embedding_model.into(),
            reranker: Arc::new(PassThroughReranker),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Runs lexical and dense top-`k` searches, both limited to chapters up to
    /// `spoiler_threshold`, and returns the union of their chunks.
    ///
    /// An empty result is normal: nothing matched, or the id lookup did not
    /// resolve every fused id.
    pub async fn retrieve(
        &self,
        novel: &Novel,
        query: &str,
        spoiler_threshold: Option<i64>,
        k: usize,
    ) -> Result<Vec<StoredChunk>> {
        let slug = novel.slug();
        let embedding = self
            .ollama
            .embed(&self.embedding_model, &format!("{QUERY_PROMPT}{query}"))
            .await
            .context("failed to embed query")?;

        let dense_fut = self.qdrant.top_k(&slug, &embedding, k, spoiler_threshold);

        let tantivy = self.tantivy.clone();
        let lexical_slug = slug.clone();
        let query_text = query.to_string();
        let lexical_fut = tokio::task::spawn_blocking(move || {
            tantivy.top_k(&lexical_slug, &query_text, k, spoiler_threshold)
        });

        let (dense, lexical) = tokio::join!(dense_fut, lexical_fut);
        let dense = dense?;
        let lexical = lexical.context("lexical search task panicked")??;

        let ids = fuse(&lexical, &dense);
        debug!(?ids, "fused candidate ids");
        info!(
            novel = %novel.title,
            lexical = lexical.len(),
            dense = dense.len(),
            fused = ids.len(),
            ?spoiler_threshold,
            "retrieved candidates"
        );

        let rows = self.db.fetch_chunks_by_ids(&ids).await?;
        let chunks = resolve(&ids, rows);
        Ok(self.reranker.rerank(query, chunks))
    }
}
