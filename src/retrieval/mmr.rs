//! Maximal Marginal Relevance selection

use crate::embedding::{cosine_similarity, SearchResult};

/// Pick up to `k` candidates balancing query relevance against novelty
///
/// Each round scores the remaining candidates with
/// `lambda * sim(query, c) - (1 - lambda) * max(sim(c, s) for s in selected)`,
/// where the penalty is 0 while nothing is selected. Ties go to the higher
/// query similarity, then to the earlier entry. Returns candidate
/// positions in selection order.
pub fn mmr_select(candidates: &[SearchResult], k: usize, lambda: f32) -> Vec<usize> {
    let target = k.min(candidates.len());
    let mut selected: Vec<usize> = Vec::with_capacity(target);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    // Highest similarity of each candidate to anything already selected
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];

    while selected.len() < target {
        let score = |i: usize| {
            let penalty = if selected.is_empty() { 0.0 } else { redundancy[i] };
            lambda * candidates[i].similarity - (1.0 - lambda) * penalty
        };

        let best = remaining
            .iter()
            .enumerate()
            .max_by(|&(_, &a), &(_, &b)| {
                score(a)
                    .total_cmp(&score(b))
                    .then(candidates[a].similarity.total_cmp(&candidates[b].similarity))
                    // max_by keeps the last maximum, so prefer the smaller id
                    .then(candidates[b].entry.entry_id.cmp(&candidates[a].entry.entry_id))
            })
            .map(|(position, &index)| (position, index));

        let Some((position, chosen)) = best else {
            break;
        };

        remaining.remove(position);
        selected.push(chosen);

        for &i in &remaining {
            let similarity =
                cosine_similarity(&candidates[i].entry.embedding, &candidates[chosen].entry.embedding);
            if similarity > redundancy[i] {
                redundancy[i] = similarity;
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::IndexEntry;
    use crate::ingest::{Chunk, SourceMetadata};
    use std::sync::Arc;

    fn candidate(entry_id: i64, embedding: Vec<f32>, query: &[f32]) -> SearchResult {
        let text = format!("entry {}", entry_id);
        SearchResult {
            similarity: cosine_similarity(query, &embedding),
            entry: Arc::new(IndexEntry {
                entry_id,
                chunk: Chunk {
                    parent_source_id: "doc".to_string(),
                    chunk_index: entry_id as usize,
                    length: text.len(),
                    text,
                    offset: 0,
                    metadata: SourceMetadata::new("doc"),
                },
                embedding,
            }),
        }
    }

    fn ids(candidates: &[SearchResult], picks: &[usize]) -> Vec<i64> {
        picks.iter().map(|&i| candidates[i].entry.entry_id).collect()
    }

    /// Two near-identical vectors on one side of the query, one on the other
    fn clustered() -> Vec<SearchResult> {
        let query = [1.0, 1.0, 0.0];
        vec![
            candidate(1, vec![1.0, 0.25, 0.0], &query),
            candidate(2, vec![1.0, 0.24, 0.0], &query),
            candidate(3, vec![0.2, 1.0, 0.0], &query),
        ]
    }

    #[test]
    fn test_lambda_one_is_plain_top_k() {
        let candidates = clustered();
        let picks = mmr_select(&candidates, 3, 1.0);
        assert_eq!(ids(&candidates, &picks), vec![1, 2, 3]);
    }

    #[test]
    fn test_diversity_skips_near_duplicate() {
        let candidates = clustered();
        let picks = mmr_select(&candidates, 2, 0.5);
        assert_eq!(ids(&candidates, &picks), vec![1, 3]);
    }

    #[test]
    fn test_first_pick_is_most_relevant() {
        let candidates = clustered();
        for lambda in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let picks = mmr_select(&candidates, 1, lambda);
            // lambda = 0 scores everything 0 on the first round; relevance breaks the tie
            assert_eq!(ids(&candidates, &picks), vec![1], "lambda {}", lambda);
        }
    }

    #[test]
    fn test_ties_prefer_earlier_entry() {
        let query = [1.0, 0.0];
        let candidates = vec![
            candidate(7, vec![1.0, 1.0], &query),
            candidate(3, vec![1.0, 1.0], &query),
        ];
        let picks = mmr_select(&candidates, 2, 0.5);
        assert_eq!(ids(&candidates, &picks), vec![3, 7]);
    }

    #[test]
    fn test_bounds() {
        let candidates = clustered();
        assert!(mmr_select(&candidates, 0, 0.5).is_empty());
        assert_eq!(mmr_select(&candidates, 10, 0.5).len(), 3);
        assert!(mmr_select(&[], 4, 0.5).is_empty());
    }
}
