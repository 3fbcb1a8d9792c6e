use std::env;
use std::path::PathBuf;

use crate::tokenizer::TokenizerKind;

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub answer_model: String,
    pub embedding_model: String,
}

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub tokenizer: TokenizerKind,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub embed_batch_size: usize,
    pub max_output_tokens: usize,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub ollama_base_url: String,
    pub qdrant_base_url: String,
    pub qdrant_collection_prefix: String,
    pub models: ModelConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("NOVEL_RAG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        Self {
            bind_addr: env::var("NOVEL_RAG_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            data_dir,
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            qdrant_base_url: env::var("QDRANT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6333".to_string()),
            qdrant_collection_prefix: env::var("QDRANT_COLLECTION_PREFIX")
                .unwrap_or_else(|_| "novel_".to_string()),
            models: ModelConfig {
                answer_model: env::var("ANSWER_MODEL")
                    .unwrap_or_else(|_| "deepseek-r1:7b".to_string()),
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "mxbai-embed-large".to_string()),
            },
            chunking: ChunkingConfig {
                max_chunk_tokens: env_usize("MAX_CHUNK_TOKENS", 512),
                overlap_tokens: env_usize("CHUNK_OVERLAP_TOKENS", 200),
                tokenizer: env::var("TOKENIZER")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default(),
            },
            retrieval: RetrievalConfig {
                top_k: env_usize("RETRIEVAL_TOP_K", 10),
                embed_batch_size: env_usize("EMBED_BATCH_SIZE", 32).max(1),
                max_output_tokens: env_usize("MAX_OUTPUT_TOKENS", 800),
            },
        }
    }

    pub fn tantivy_dir(&self) -> PathBuf {
        self.data_dir.join("tantivy")
    }

    pub fn sqlite_dsn(&self) -> String {
        format!("sqlite://{}", self.data_dir.join("novels.sqlite3").display())
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
