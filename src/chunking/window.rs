use crate::models::{Chunk, Unit};

/// Joins unit texts inside a chunk.
pub const UNIT_SEPARATOR: &str = " ";

/// Packs units into overlapping chunks of at most `max_chunk_size` tokens.
///
/// Each chunk is seeded with the first unit not yet covered. Preceding units
/// are pulled in front of the seed while the running size stays within both
/// `seed + overlap` and `max_chunk_size`, stopping at the first unit that
/// breaks either bound. Following units are then appended until the next one
/// would exceed `max_chunk_size`, and the next chunk is seeded there.
///
/// A seed larger than `max_chunk_size` becomes a chunk on its own.
pub fn window(units: &[Unit], max_chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut seed = 0;

    while seed < units.len() {
        let seed_len = units[seed].token_length;
        let overlap_limit = seed_len.saturating_add(overlap);
        let mut size = seed_len;

        let mut start = seed;
        while start > 0 {
            let pulled = size + units[start - 1].token_length;
            if pulled > overlap_limit || pulled > max_chunk_size {
                break;
            }
            size = pulled;
            start -= 1;
        }

        let mut end = seed + 1;
        while end < units.len() && size + units[end].token_length <= max_chunk_size {
            size += units[end].token_length;
            end += 1;
        }

        chunks.push(Chunk {
            chunk_number: chunks.len() as i64 + 1,
            content: join_units(&units[start..end]),
            token_length: size,
            overlap_start: start,
            seed,
            end,
        });

        seed = end;
    }

    chunks
}

fn join_units(units: &[Unit]) -> String {
    units
        .iter()
        .map(|unit| unit.text.as_str())
        .collect::<Vec<_>>()
        .join(UNIT_SEPARATOR)
}
