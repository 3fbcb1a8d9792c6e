use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use tiktoken_rs::CoreBPE;

/// Counts model tokens for a piece of text.
///
/// Implementations must be deterministic: the same text always yields the same
/// count for a given model.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenizerKind {
    #[default]
    Cl100kBase,
    O200kBase,
    P50kBase,
}

impl TokenizerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenizerKind::Cl100kBase => "cl100k_base",
            TokenizerKind::O200kBase => "o200k_base",
            TokenizerKind::P50kBase => "p50k_base",
        }
    }

    pub fn build(self) -> Result<BpeCounter> {
        let bpe = match self {
            TokenizerKind::Cl100kBase => tiktoken_rs::cl100k_base()?,
            TokenizerKind::O200kBase => tiktoken_rs::o200k_base()?,
            TokenizerKind::P50kBase => tiktoken_rs::p50k_base()?,
        };
        Ok(BpeCounter { bpe })
    }
}

impl fmt::Display for TokenizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenizerKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cl100k_base" | "cl100k" => Ok(TokenizerKind::Cl100kBase),
            "o200k_base" | "o200k" => Ok(TokenizerKind::O200kBase),
            "p50k_base" | "p50k" => Ok(TokenizerKind::P50kBase),
            other => anyhow::bail!("unknown tokenizer: {other}"),
        }
    }
}

pub struct BpeCounter {
    bpe: CoreBPE,
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// One token per whitespace-separated word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceCounter;

impl TokenCounter for WhitespaceCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}
