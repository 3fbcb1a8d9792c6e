use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::db::Database;
use crate::models::{ChatAnswer, ChatRequest, Citation, Novel, StoredChunk};
use crate::ollama::OllamaClient;
use crate::retrieval::Retriever;

pub const NOT_FOUND_MESSAGE: &str =
    "The provided context does not contain information to answer this question.";

const SYSTEM_PROMPT: &str = "You are a specialized RAG system for answering questions about novels. \
Your primary directive is to derive answers exclusively from the contextual information provided.

When answering:
* Base your entire answer on the provided text snippets.
* Quote short phrases from the context when they support the answer, but rephrase and synthesize instead of copying large passages.
* Cite the snippets you used with their tags, like [S1].
* If the context does not contain the information needed, respond exactly: 'The provided context does not contain information to answer this question.'
* Do not infer, speculate, or use any knowledge beyond the supplied text.";

const SNIPPET_WORDS: usize = 36;

/// Raised when a request names a novel that was never ingested.
#[derive(Debug)]
pub struct UnknownNovel(pub String);

impl fmt::Display for UnknownNovel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown novel: {}", self.0)
    }
}

impl std::error::Error for UnknownNovel {}

#[derive(Clone)]
pub struct ChatService {
    config: AppConfig,
    db: Database,
    ollama: OllamaClient,
    retriever: Retriever,
    generation_limit: Arc<Semaphore>,
}

impl ChatService {
    pub fn new(
        config: AppConfig,
        db: Database,
        ollama: OllamaClient,
        retriever: Retriever,
        generation_limit: Arc<Semaphore>,
    ) -> Self {
        Self {
            config,
            db,
            ollama,
            retriever,
            generation_limit,
        }
    }

    pub async fn answer(&self, request: ChatRequest) -> Result<ChatAnswer> {
        let started = Instant::now();

        let novel = self
            .db
            .novel_by_title(&request.novel)
            .await?
            .ok_or_else(|| UnknownNovel(request.novel.clone()))?;

        let chunks = self
            .retriever
            .retrieve(
                &novel,
                &request.question,
                effective_threshold(request.spoiler_threshold),
                self.config.retrieval.top_k,
            )
            .await?;

        self.answer_from_chunks(&novel, &request.question, chunks, started)
            .await
    }

    /// Generates the answer for already-retrieved context. Empty context gets
    /// the fixed not-found answer and the model is never called.
    pub async fn answer_from_chunks(
        &self,
        novel: &Novel,
        question: &str,
        chunks: Vec<StoredChunk>,
        started: Instant,
    ) -> Result<ChatAnswer> {
        if chunks.is_empty() {
            info!(novel = %novel.title, "no context retrieved, skipping generation");
            return Ok(ChatAnswer {
                answer_markdown: NOT_FOUND_MESSAGE.to_string(),
                citations: vec![],
                latency_ms: started.elapsed().as_millis(),
            });
        }

        let context = build_context(&chunks);
        let prompt = build_user_prompt(question, &context);
        debug!(chunks = chunks.len(), prompt_chars = prompt.len(), "built answer prompt");

        let raw = {
            let _permit = self.generation_limit.acquire().await?;
            self.ollama
                .chat(
                    &self.config.models.answer_model,
                    SYSTEM_PROMPT,
                    &prompt,
                    self.config.retrieval.max_output_tokens,
                    0.1,
                )
                .await?
        };

        let mut answer_text = sanitize_model_output(strip_reasoning(&raw));
        if answer_text.is_empty() {
            answer_text = NOT_FOUND_MESSAGE.to_string();
        }

        let citations = build_citations(&chunks, &answer_text);
        let latency_ms = started.elapsed().as_millis();
        info!(
            novel = %novel.title,
            citations = citations.len(),
            latency_ms,
            "answered question"
        );

        Ok(ChatAnswer {
            answer_markdown: answer_text,
            citations,
            latency_ms,
        })
    }
}

/// Chapter numbers start at 1, so a threshold below that means no limit.
fn effective_threshold(spoiler_threshold: Option<i64>) -> Option<i64> {
    spoiler_threshold.filter(|max| *max > 0)
}

/// Drops a reasoning model's `<think>...</think>` preamble.
pub fn strip_reasoning(raw: &str) -> String {
    match raw.rfind("</think>") {
        Some(pos) => raw[pos + "</think>".len()..].trim().to_string(),
        None => raw.trim().to_string(),
    }
}

fn sanitize_model_output(answer: String) -> String {
    let mut text = answer.trim().to_string();
    if text.starts_with("```") {
        match Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```$")
            .ok()
            .and_then(|re| re.captures(&text).and_then(|caps| caps.get(1)))
        {
            Some(body) => text = body.as_str().trim().to_string(),
            None => text = text.replace("```", "").trim().to_string(),
        }
    }
    text
}

/// Chunk texts tagged `[S1]`, `[S2]`, ... in retrieval order, separated by
/// blank lines.
fn build_context(chunks: &[StoredChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[S{}] chapter={}\n{}",
                i + 1,
                chunk.chapter_number,
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_user_prompt(question: &str, context: &str) -> String {
    format!("**Context:**\n{context}\n\n**Question:**\n{question}")
}

fn build_citations(chunks: &[StoredChunk], answer: &str) -> Vec<Citation> {
    if answer.trim().eq_ignore_ascii_case(NOT_FOUND_MESSAGE) {
        return vec![];
    }

    let markers = extract_source_markers(answer);
    let cited: Vec<&StoredChunk> = markers
        .iter()
        .filter_map(|n| n.checked_sub(1).and_then(|i| chunks.get(i)))
        .collect();

    let sources = if cited.is_empty() {
        chunks.iter().collect()
    } else {
        cited
    };

    sources
        .into_iter()
        .map(|chunk| Citation {
            chunk_id: chunk.id,
            chapter_number: chunk.chapter_number,
            chunk_number: chunk.chunk_number,
            snippet: chunk
                .content
                .split_whitespace()
                .take(SNIPPET_WORDS)
                .collect::<Vec<_>>()
                .join(" "),
        })
        .collect()
}

/// 1-based source numbers referenced as `[S<n>]`, first occurrence order.
fn extract_source_markers(answer: &str) -> Vec<usize> {
    let Ok(re) = Regex::new(r"(?i)\[s(\d+)\]") else {
        return vec![];
    };

    let mut markers = Vec::new();
    for captures in re.captures_iter(answer) {
        let Some(number) = captures.get(1).and_then(|m| m.as_str().parse().ok()) else {
            continue;
        };
        if !markers.contains(&number) {
            markers.push(number);
        }
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qdrant_store::QdrantStore;
    use crate::tantivy_store::TantivyStore;

    fn stored(id: i64, chapter_number: i64, content: &str) -> StoredChunk {
        StoredChunk {
            id,
            novel_id: 1,
            chapter_id: chapter_number,
            chapter_number,
            chunk_number: 1,
            content: content.to_string(),
            token_count: 10,
        }
    }

    #[test]
    fn zero_threshold_means_no_limit() {
        assert_eq!(effective_threshold(Some(0)), None);
        assert_eq!(effective_threshold(Some(-3)), None);
        assert_eq!(effective_threshold(Some(12)), Some(12));
        assert_eq!(effective_threshold(None), None);
    }

    #[tokio::test]
    async fn empty_context_answers_without_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::from_env();
        config.data_dir = dir.path().to_path_buf();
        let db = Database::new(&config).await.unwrap();
        let novel = db.upsert_novel("Test Novel").await.unwrap();

        // Nothing listens on port 9, so any model call would fail the answer.
        let ollama = OllamaClient::new("http://127.0.0.1:9");
        let retriever = Retriever::new(
            db.clone(),
            QdrantStore::new("http://127.0.0.1:9", "novel_"),
            TantivyStore::new(config.tantivy_dir()),
            ollama.clone(),
            config.models.embedding_model.clone(),
        );
        let limit = Arc::new(Semaphore::new(1));
        let chat = ChatService::new(config, db, ollama, retriever, limit.clone());

        let answer = chat
            .answer_from_chunks(&novel, "Who won?", vec![], Instant::now())
            .await
            .unwrap();
        assert_eq!(answer.answer_markdown, NOT_FOUND_MESSAGE);
        assert!(answer.citations.is_empty());
        assert_eq!(limit.available_permits(), 1);
    }

    #[test]
    fn strips_reasoning_preamble() {
        let raw = "<think>\nThe user wants the name.\n</think>\n\nArthur did it [S1].";
        assert_eq!(strip_reasoning(raw), "Arthur did it [S1].");
        assert_eq!(strip_reasoning("  plain answer "), "plain answer");
    }

    #[test]
    fn strips_markdown_fences() {
        let cleaned = sanitize_model_output("```markdown\nHello\n```".to_string());
        assert_eq!(cleaned, "Hello");
    }

    #[test]
    fn context_joins_tagged_chunks_with_blank_lines() {
        let chunks = vec![stored(7, 2, "First passage."), stored(9, 4, "Second passage.")];
        let context = build_context(&chunks);
        assert_eq!(
            context,
            "[S1] chapter=2\nFirst passage.\n\n[S2] chapter=4\nSecond passage."
        );

        let prompt = build_user_prompt("Who?", &context);
        assert!(prompt.starts_with("**Context:**\n[S1]"));
        assert!(prompt.ends_with("**Question:**\nWho?"));
    }

    #[test]
    fn citations_follow_referenced_sources() {
        let chunks = vec![
            stored(7, 2, "Arthur woke up."),
            stored(9, 4, "The dragon fell."),
        ];
        let citations = build_citations(&chunks, "It fell [S2], after [s2] and [S9].");
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].chunk_id, 9);
        assert_eq!(citations[0].chapter_number, 4);
    }

    #[test]
    fn uncited_answer_cites_every_source() {
        let chunks = vec![stored(7, 2, "Arthur woke up."), stored(9, 4, "The dragon fell.")];
        let ids: Vec<i64> = build_citations(&chunks, "Arthur won.")
            .iter()
            .map(|c| c.chunk_id)
            .collect();
        assert_eq!(ids, vec![7, 9]);
    }

    #[test]
    fn not_found_answer_has_no_citations() {
        let chunks = vec![stored(7, 2, "Arthur woke up.")];
        assert!(build_citations(&chunks, NOT_FOUND_MESSAGE).is_empty());
    }

    #[test]
    fn source_markers_ignore_zero_and_duplicates() {
        assert_eq!(extract_source_markers("[S3] [S1] [s3] [S0]"), vec![3, 1, 0]);
        let chunks = vec![stored(1, 1, "x")];
        assert_eq!(build_citations(&chunks, "see [S0]").len(), 1);
    }
}
