pub mod chapters;

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::chunking::Chunker;
use crate::config::AppConfig;
use crate::db::Database;
use crate::models::{Chapter, ChapterSource, Novel, StoredChunk};
use crate::ollama::OllamaClient;
use crate::qdrant_store::{QdrantPayload, QdrantPoint, QdrantStore};
use crate::tantivy_store::TantivyStore;

/// Chapters that produce more chunks than this are reported after chunking.
pub const CHUNKY_CHAPTER_THRESHOLD: usize = 5;

const UPSERT_BATCH: usize = 64;

#[derive(Clone)]
pub struct Ingestor {
    config: AppConfig,
    db: Database,
    ollama: OllamaClient,
    qdrant: QdrantStore,
    tantivy: TantivyStore,
    chunker: Chunker,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub novel: Novel,
    pub chapters_imported: usize,
    pub chunk_count: usize,
    pub chunky_chapters: Vec<(i64, usize)>,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkingSummary {
    pub chunk_count: usize,
    pub chunky_chapters: Vec<(i64, usize)>,
    /// Chapters chunked in this pass.
    pub chapter_ids: Vec<i64>,
}

impl Ingestor {
    pub fn new(
        config: AppConfig,
        db: Database,
        ollama: OllamaClient,
        qdrant: QdrantStore,
        tantivy: TantivyStore,
        chunker: Chunker,
    ) -> Self {
        Self {
            config,
            db,
            ollama,
            qdrant,
            tantivy,
            chunker,
        }
    }

    /// Imports a novel's chapter files, chunks them, and builds both indexes.
    ///
    /// A novel with no chunks (or any novel when `rebuild` is set) is chunked
    /// and indexed from scratch. Otherwise only chapters without chunks are
    /// chunked, their points are added to the dense index, and the lexical
    /// index is rebuilt. Nothing runs past the import when every chapter
    /// already has chunks.
    pub async fn prepare_novel(
        &self,
        title: &str,
        chapters_dir: &Path,
        rebuild: bool,
    ) -> Result<IngestReport> {
        let novel = self.db.upsert_novel(title).await?;
        let chapters_imported = self.import_chapters(&novel, chapters_dir).await?;

        if rebuild {
            self.db.delete_chunks(novel.id).await?;
        }

        let existing_chunks = self.db.count_chunks(novel.id).await?;
        if existing_chunks == 0 {
            let summary = self.chunk_novel(&novel).await?;
            self.index_novel(&novel).await?;
            return Ok(IngestReport {
                novel,
                chapters_imported,
                chunk_count: summary.chunk_count,
                chunky_chapters: summary.chunky_chapters,
                skipped: false,
            });
        }

        let summary = self.chunk_pending(&novel).await?;
        if summary.chunk_count == 0 {
            info!(
                novel = %novel.title,
                existing_chunks,
                "every chapter already chunked, skipping chunking and indexing"
            );
            return Ok(IngestReport {
                novel,
                chapters_imported,
                chunk_count: existing_chunks as usize,
                chunky_chapters: summary.chunky_chapters,
                skipped: true,
            });
        }

        self.index_new_chunks(&novel, &summary.chapter_ids).await?;
        Ok(IngestReport {
            novel,
            chapters_imported,
            chunk_count: existing_chunks as usize + summary.chunk_count,
            chunky_chapters: summary.chunky_chapters,
            skipped: false,
        })
    }

    async fn import_chapters(&self, novel: &Novel, chapters_dir: &Path) -> Result<usize> {
        let dir = chapters_dir.to_path_buf();
        let sources = tokio::task::spawn_blocking(move || chapters::read_chapter_dir(&dir))
            .await
            .context("chapter import task panicked")??;

        let existing = self.db.chapter_numbers(novel.id).await?;
        let fresh = select_new_chapters(sources, &existing);
        self.db.insert_chapters(novel.id, &fresh).await?;

        info!(
            novel = %novel.title,
            imported = fresh.len(),
            already_present = existing.len(),
            "imported chapters"
        );
        Ok(fresh.len())
    }

    /// Chunks every chapter in chapter order and persists the results.
    pub async fn chunk_novel(&self, novel: &Novel) -> Result<ChunkingSummary> {
        let chapters = self.db.chapters_for_novel(novel.id).await?;
        self.chunk_chapters(novel, &chapters).await
    }

    /// Chunks only the chapters that have no stored chunks yet.
    pub async fn chunk_pending(&self, novel: &Novel) -> Result<ChunkingSummary> {
        let chapters = self.db.unchunked_chapters(novel.id).await?;
        self.chunk_chapters(novel, &chapters).await
    }

    async fn chunk_chapters(
        &self,
        novel: &Novel,
        chapters: &[Chapter],
    ) -> Result<ChunkingSummary> {
        let mut per_chapter = Vec::with_capacity(chapters.len());

        for chapter in chapters {
            let chunker = self.chunker.clone();
            let content = chapter.content.clone();
            let chunks = tokio::task::spawn_blocking(move || chunker.chunk_text(&content))
                .await
                .context("chunking task panicked")?;

            self.db
                .persist_chunks(chapter, &chunks)
                .await
                .with_context(|| {
                    format!("failed storing chunks for chapter {}", chapter.chapter_number)
                })?;
            per_chapter.push((chapter.chapter_number, chunks.len()));
        }

        let mut summary = summarize_chunking(&per_chapter);
        summary.chapter_ids = chapters.iter().map(|c| c.id).collect();
        for (chapter_number, count) in &summary.chunky_chapters {
            warn!(chapter_number, chunks = count, "chunky chapter");
        }
        info!(
            novel = %novel.title,
            chapters = chapters.len(),
            chunks = summary.chunk_count,
            chunky = summary.chunky_chapters.len(),
            "chunked chapters"
        );
        Ok(summary)
    }

    /// Rebuilds the dense and lexical indexes from the stored chunks.
    pub async fn index_novel(&self, novel: &Novel) -> Result<usize> {
        let chunks = self.db.chunks_for_novel(novel.id).await?;
        if chunks.is_empty() {
            warn!(novel = %novel.title, "no chunks to index");
            return Ok(0);
        }

        let slug = novel.slug();
        let points = self.embed_points(novel, &chunks).await?;
        if let Some(first) = points.first() {
            self.qdrant
                .recreate_collection(&slug, first.vector.len())
                .await?;
        }
        for batch in points.chunks(UPSERT_BATCH) {
            self.qdrant.upsert_points(&slug, batch).await?;
        }

        let count = chunks.len();
        self.rebuild_lexical(&slug, chunks).await?;
        info!(novel = %novel.title, chunks = count, "indexes rebuilt");
        Ok(count)
    }

    /// Adds the chunks of `chapter_ids` to the dense index and rebuilds the
    /// lexical index over the whole novel.
    async fn index_new_chunks(&self, novel: &Novel, chapter_ids: &[i64]) -> Result<usize> {
        let chunks = self.db.chunks_for_novel(novel.id).await?;
        let fresh = chunks_in_chapters(&chunks, chapter_ids);

        let slug = novel.slug();
        let points = self.embed_points(novel, &fresh).await?;
        for batch in points.chunks(UPSERT_BATCH) {
            self.qdrant.upsert_points(&slug, batch).await?;
        }

        let added = fresh.len();
        self.rebuild_lexical(&slug, chunks).await?;
        info!(novel = %novel.title, added, "indexes updated");
        Ok(added)
    }

    async fn embed_points(
        &self,
        novel: &Novel,
        chunks: &[StoredChunk],
    ) -> Result<Vec<QdrantPoint>> {
        let batch_size = self.config.retrieval.embed_batch_size.max(1);
        let mut points = Vec::with_capacity(chunks.len());
        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let vectors = self.embed_chunks(batch).await?;
            for (chunk, vector) in batch.iter().zip(vectors) {
                points.push(point_for(chunk, vector)?);
            }
            info!(
                novel = %novel.title,
                batch = batch_no + 1,
                embedded = points.len(),
                total = chunks.len(),
                "embedded batch"
            );
        }
        Ok(points)
    }

    async fn rebuild_lexical(&self, slug: &str, chunks: Vec<StoredChunk>) -> Result<()> {
        let tantivy = self.tantivy.clone();
        let slug = slug.to_string();
        tokio::task::spawn_blocking(move || tantivy.rebuild(&slug, &chunks))
            .await
            .context("tantivy rebuild task panicked")?
    }

    async fn embed_chunks(&self, batch: &[StoredChunk]) -> Result<Vec<Vec<f32>>> {
        let model = &self.config.models.embedding_model;
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

        match self.ollama.embed_batch(model, &texts).await {
            Ok(vectors) => Ok(vectors),
            Err(err) => {
                warn!(error = %err, "batch embedding failed, embedding chunks one by one");
                let mut vectors = Vec::with_capacity(batch.len());
                for chunk in batch {
                    let vector = self
                        .ollama
                        .embed(model, &chunk.content)
                        .await
                        .with_context(|| format!("failed embedding for chunk {}", chunk.id))?;
                    vectors.push(vector);
                }
                Ok(vectors)
            }
        }
    }
}

fn point_for(chunk: &StoredChunk, vector: Vec<f32>) -> Result<QdrantPoint> {
    let id = u64::try_from(chunk.id)
        .with_context(|| format!("chunk id {} cannot be a qdrant point id", chunk.id))?;
    Ok(QdrantPoint {
        id,
        vector,
        payload: QdrantPayload {
            chunk_id: chunk.id,
            chapter_number: chunk.chapter_number,
            chunk_number: chunk.chunk_number,
        },
    })
}

/// Drops chapters already stored for the novel and repeated numbers within
/// the batch, keeping the first file seen.
fn select_new_chapters(
    sources: Vec<ChapterSource>,
    existing: &HashSet<i64>,
) -> Vec<ChapterSource> {
    let mut seen = existing.clone();
    let mut fresh = Vec::new();
    for source in sources {
        if seen.insert(source.chapter_number) {
            fresh.push(source);
        } else {
            warn!(chapter_number = source.chapter_number, "chapter already present, skipping");
        }
    }
    fresh
}

fn chunks_in_chapters(chunks: &[StoredChunk], chapter_ids: &[i64]) -> Vec<StoredChunk> {
    let wanted: HashSet<i64> = chapter_ids.iter().copied().collect();
    chunks
        .iter()
        .filter(|chunk| wanted.contains(&chunk.chapter_id))
        .cloned()
        .collect()
}

fn summarize_chunking(per_chapter: &[(i64, usize)]) -> ChunkingSummary {
    ChunkingSummary {
        chapter_ids: vec![],
        chunk_count: per_chapter.iter().map(|(_, n)| n).sum(),
        chunky_chapters: per_chapter
            .iter()
            .filter(|(_, n)| *n > CHUNKY_CHAPTER_THRESHOLD)
            .copied()
            .collect(),
    }
}
