pub mod segment;
pub mod sentence;
pub mod window;

use std::sync::Arc;

use anyhow::Result;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Unit};
use crate::tokenizer::TokenCounter;

pub use segment::segment;
pub use sentence::{RegexSentenceSplitter, SentenceSplitter};
pub use window::window;

/// Turns chapter text into token-bounded, overlapping chunks.
#[derive(Clone)]
pub struct Chunker {
    counter: Arc<dyn TokenCounter>,
    splitter: Arc<dyn SentenceSplitter>,
    max_chunk_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    pub fn new(
        counter: Arc<dyn TokenCounter>,
        splitter: Arc<dyn SentenceSplitter>,
        max_chunk_tokens: usize,
        overlap_tokens: usize,
    ) -> Self {
        Self {
            counter,
            splitter,
            max_chunk_tokens,
            overlap_tokens,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        let counter = config.tokenizer.build()?;
        let splitter = RegexSentenceSplitter::new()?;
        Ok(Self::new(
            Arc::new(counter),
            Arc::new(splitter),
            config.max_chunk_tokens,
            config.overlap_tokens,
        ))
    }

    pub fn max_chunk_tokens(&self) -> usize {
        self.max_chunk_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    pub fn segment(&self, text: &str) -> Vec<Unit> {
        segment(
            text,
            self.max_chunk_tokens,
            self.overlap_tokens,
            self.counter.as_ref(),
            self.splitter.as_ref(),
        )
    }

    pub fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        let units = self.segment(text);
        window(&units, self.max_chunk_tokens, self.overlap_tokens)
    }
}
