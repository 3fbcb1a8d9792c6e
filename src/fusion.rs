use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::models::{ChunkId, RetrievalCandidate, StoredChunk};

/// Merges lexical and dense candidates into one list of unique chunk ids.
///
/// No scores are compared across the two retrievers. Ids keep their first
/// appearance, lexical before dense, so the output is deterministic. The
/// query plays no part here; it reaches the [`Reranker`] after resolution.
pub fn fuse(lexical: &[RetrievalCandidate], dense: &[RetrievalCandidate]) -> Vec<ChunkId> {
    let mut seen = HashSet::with_capacity(lexical.len() + dense.len());
    lexical
        .iter()
        .chain(dense)
        .filter(|candidate| seen.insert(candidate.chunk_id))
        .map(|candidate| candidate.chunk_id)
        .collect()
}

/// Orders fetched rows by `ids`, or returns nothing when any id is missing.
///
/// A partial lookup cannot be attributed to particular ids, so it is treated
/// as an empty result.
pub fn resolve(ids: &[ChunkId], mut rows: HashMap<ChunkId, StoredChunk>) -> Vec<StoredChunk> {
    if rows.len() != ids.len() {
        warn!(
            requested = ids.len(),
            resolved = rows.len(),
            "chunk lookup mismatch, dropping retrieval results"
        );
        return Vec::new();
    }

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        match rows.remove(id) {
            Some(chunk) => out.push(chunk),
            None => {
                warn!(chunk_id = id, "requested chunk missing from lookup");
                return Vec::new();
            }
        }
    }
    out
}

/// Reorders resolved chunks for a query before they reach the prompt.
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, chunks: Vec<StoredChunk>) -> Vec<StoredChunk>;
}

/// Keeps fusion order unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughReranker;

impl Reranker for PassThroughReranker {
    fn rerank(&self, _query: &str, chunks: Vec<StoredChunk>) -> Vec<StoredChunk> {
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetrievalOrigin;

    fn candidates(ids: &[ChunkId], origin: RetrievalOrigin) -> Vec<RetrievalCandidate> {
        ids.iter()
            .enumerate()
            .map(|(rank, id)| RetrievalCandidate {
                chunk_id: *id,
                score: 1.0 / (rank + 1) as f32,
                origin,
            })
            .collect()
    }

    fn stored(id: ChunkId) -> StoredChunk {
        StoredChunk {
            id,
            novel_id: 1,
            chapter_id: 1,
            chapter_number: 1,
            chunk_number: id,
            content: format!("chunk {id}"),
            token_count: 2,
        }
    }

    #[test]
    fn fuses_into_deduplicated_union() {
        let lexical = candidates(&[7, 2, 9], RetrievalOrigin::Lexical);
        let dense = candidates(&[9, 5, 2], RetrievalOrigin::Dense);
        let fused = fuse(&lexical, &dense);
        assert_eq!(fused, vec![7, 2, 9, 5]);

        let as_set: HashSet<ChunkId> = fused.iter().copied().collect();
        assert_eq!(as_set, HashSet::from([2, 5, 7, 9]));
    }

    #[test]
    fn fused_size_matches_union_size() {
        let pairs: [(&[ChunkId], &[ChunkId]); 4] = [
            (&[], &[]),
            (&[1, 2, 3], &[]),
            (&[1, 1, 2], &[2, 2, 3]),
            (&[4, 5, 6], &[6, 5, 4]),
        ];
        for (lex, den) in pairs {
            let fused = fuse(
                &candidates(lex, RetrievalOrigin::Lexical),
                &candidates(den, RetrievalOrigin::Dense),
            );
            let union: HashSet<ChunkId> = lex.iter().chain(den).copied().collect();
            assert_eq!(fused.len(), union.len());
        }
    }

    #[test]
    fn resolve_orders_rows_by_requested_ids() {
        let rows: HashMap<ChunkId, StoredChunk> =
            [5, 7, 2].into_iter().map(|id| (id, stored(id))).collect();
        let resolved = resolve(&[7, 2, 5], rows);
        let ids: Vec<ChunkId> = resolved.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![7, 2, 5]);
    }

    #[test]
    fn resolve_fails_closed_on_missing_rows() {
        let rows: HashMap<ChunkId, StoredChunk> =
            [7, 2].into_iter().map(|id| (id, stored(id))).collect();
        assert!(resolve(&[7, 2, 5], rows).is_empty());
    }

    #[test]
    fn resolve_fails_closed_on_unexpected_rows() {
        let rows: HashMap<ChunkId, StoredChunk> =
            [7, 3].into_iter().map(|id| (id, stored(id))).collect();
        assert!(resolve(&[7, 2], rows).is_empty());
    }

    #[test]
    fn pass_through_reranker_keeps_order() {
        let chunks = vec![stored(3), stored(1), stored(2)];
        let reranked = PassThroughReranker.rerank("who is the demon king?", chunks);
        let ids: Vec<ChunkId> = reranked.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }
}
