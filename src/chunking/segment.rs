use tracing::debug;

use super::sentence::SentenceSplitter;
use crate::models::Unit;
use crate::tokenizer::TokenCounter;

/// Splits chapter text into units, escalating granularity only when needed.
///
/// Paragraphs (blank-line separated) are kept when every one of them leaves
/// room for `overlap` inside `max_chunk_size`. Otherwise the whole text is
/// re-split into sentences, and any sentence still larger than
/// `max_chunk_size` is broken on its line breaks. Document order is kept and
/// nothing is merged.
pub fn segment(
    text: &str,
    max_chunk_size: usize,
    overlap: usize,
    counter: &dyn TokenCounter,
    splitter: &dyn SentenceSplitter,
) -> Vec<Unit> {
    let paragraphs = measure(counter, split_paragraphs(text));
    if !paragraphs
        .iter()
        .any(|unit| unit.token_length + overlap > max_chunk_size)
    {
        return paragraphs;
    }

    debug!(
        paragraphs = paragraphs.len(),
        "paragraph exceeds budget with overlap, splitting into sentences"
    );
    let sentences = measure(counter, splitter.split(text));
    if !sentences.iter().any(|unit| unit.token_length > max_chunk_size) {
        return sentences;
    }

    debug!(
        sentences = sentences.len(),
        "sentence exceeds budget, splitting on line breaks"
    );
    let mut units = Vec::with_capacity(sentences.len());
    for sentence in sentences {
        if sentence.token_length <= max_chunk_size {
            units.push(sentence);
            continue;
        }
        let lines = sentence
            .text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string);
        units.extend(measure(counter, lines));
    }
    units
}

/// Groups consecutive non-blank lines into trimmed paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            flush_paragraph(&mut paragraphs, &mut current);
        } else {
            current.push(line);
        }
    }
    flush_paragraph(&mut paragraphs, &mut current);

    paragraphs
}

fn flush_paragraph(out: &mut Vec<String>, lines: &mut Vec<&str>) {
    if lines.is_empty() {
        return;
    }
    let paragraph = lines.join("\n");
    let trimmed = paragraph.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    lines.clear();
}

fn measure<I>(counter: &dyn TokenCounter, pieces: I) -> Vec<Unit>
where
    I: IntoIterator<Item = String>,
{
    pieces
        .into_iter()
        .map(|text| {
            let token_length = counter.count(&text);
            Unit { text, token_length }
        })
        .collect()
}
