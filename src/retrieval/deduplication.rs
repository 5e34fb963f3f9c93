//! Candidate deduplication by knowledge base and chunk ID

use crate::retrieval::RetrievalCandidate;
use ahash::AHashMap;

/// Deduplicate candidates by (knowledge base, chunk id), keeping the
/// highest-scored instance at the position of its first occurrence
///
/// # Arguments
/// * `candidates` - Candidates potentially with duplicates
///
/// # Returns
/// Deduplicated candidates, in first-seen order
pub fn deduplicate_candidates(candidates: Vec<RetrievalCandidate>) -> Vec<RetrievalCandidate> {
    let mut positions: AHashMap<(String, String), usize> = AHashMap::new();
    let mut unique: Vec<RetrievalCandidate> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let key = (
            candidate.chunk.knowledge_base_id.clone(),
            candidate.chunk.id.clone(),
        );
        match positions.get(&key) {
            Some(&pos) => {
                if candidate.raw_score > unique[pos].raw_score {
                    unique[pos] = candidate;
                }
            }
            None => {
                positions.insert(key, unique.len());
                unique.push(candidate);
            }
        }
    }

    unique
}
