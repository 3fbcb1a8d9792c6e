use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChunkId = i64;

/// Atomic piece of chapter text with its token length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub text: String,
    pub token_length: usize,
}

impl Unit {
    pub fn new(text: impl Into<String>, token_length: usize) -> Self {
        Self {
            text: text.into(),
            token_length,
        }
    }
}

/// A budget-bounded window over a chapter's units.
///
/// `overlap_start..seed` are the units repeated from earlier text and
/// `seed..end` are the units this chunk introduces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_number: i64,
    pub content: String,
    pub token_length: usize,
    pub overlap_start: usize,
    pub seed: usize,
    pub end: usize,
}

impl Chunk {
    pub fn unit_count(&self) -> usize {
        self.end - self.overlap_start
    }

    pub fn overlap_units(&self) -> usize {
        self.seed - self.overlap_start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Novel {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Novel {
    /// Lowercase ASCII alphanumerics of the title, used to name per-novel indexes.
    pub fn slug(&self) -> String {
        slug_from_title(&self.title)
    }
}

pub fn slug_from_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub novel_id: i64,
    pub chapter_number: i64,
    pub title: Option<String>,
    pub content: String,
}

/// Chapter text read from disk, not yet persisted.
#[derive(Debug, Clone)]
pub struct ChapterSource {
    pub chapter_number: i64,
    pub title: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: ChunkId,
    pub novel_id: i64,
    pub chapter_id: i64,
    pub chapter_number: i64,
    pub chunk_number: i64,
    pub content: String,
    pub token_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalOrigin {
    Lexical,
    Dense,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCandidate {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub origin: RetrievalOrigin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub chapter_number: i64,
    pub chunk_number: i64,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub novel: String,
    pub question: String,
    #[serde(default)]
    pub spoiler_threshold: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub answer_markdown: String,
    pub citations: Vec<Citation>,
    pub latency_ms: u128,
}
