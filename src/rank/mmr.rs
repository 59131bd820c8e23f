use crate::models::Candidate;
use crate::search::vector::cosine_similarity;

/// Reorder an already-selected result set for diversity with maximal
/// marginal relevance. `lambda` weights relevance against redundancy;
/// `lambda = 1.0` reproduces the input order exactly.
///
/// Relevance is the min-max normalized final score, so MMR behaves the same
/// whether the scores came from fusion or from the reranker. Redundancy is
/// the highest cosine similarity to any already-picked chunk; candidates
/// without a stored embedding incur no penalty.
pub fn mmr_order<F>(candidates: Vec<Candidate>, lambda: f32, embedding_of: F) -> Vec<Candidate>
where
    F: Fn(&str) -> Option<Vec<f32>>,
{
    if candidates.len() <= 1 {
        return candidates;
    }

    let relevance = normalized_relevance(&candidates);
    let embeddings: Vec<Option<Vec<f32>>> = candidates
        .iter()
        .map(|c| embedding_of(&c.chunk_id))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut picked: Vec<usize> = Vec::with_capacity(candidates.len());

    while !remaining.is_empty() {
        let mut best_slot = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (slot, &idx) in remaining.iter().enumerate() {
            let redundancy = max_similarity(&embeddings, idx, &picked);
            let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;
            // Strict comparison keeps the earlier (higher ranked) candidate
            // on ties.
            if score > best_score {
                best_score = score;
                best_slot = slot;
            }
        }
        picked.push(remaining.remove(best_slot));
    }

    let mut by_index: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|idx| by_index[idx].take())
        .collect()
}

fn normalized_relevance(candidates: &[Candidate]) -> Vec<f32> {
    let min = candidates
        .iter()
        .map(|c| c.final_score)
        .fold(f32::INFINITY, f32::min);
    let max = candidates
        .iter()
        .map(|c| c.final_score)
        .fold(f32::NEG_INFINITY, f32::max);
    if max - min <= f32::EPSILON {
        return vec![1.0; candidates.len()];
    }
    candidates
        .iter()
        .map(|c| (c.final_score - min) / (max - min))
        .collect()
}

fn max_similarity(embeddings: &[Option<Vec<f32>>], idx: usize, picked: &[usize]) -> f32 {
    let Some(candidate_emb) = &embeddings[idx] else {
        return 0.0;
    };
    picked
        .iter()
        .filter_map(|&p| embeddings[p].as_ref())
        .map(|e| cosine_similarity(candidate_emb, e))
        .fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use std::collections::HashMap;

    fn candidate(id: &str, score: f32) -> Candidate {
        let mut c = Candidate::bare(
            id.to_string(),
            format!("doc-{id}"),
            format!("text {id}"),
            ChunkMetadata::default(),
        );
        c.final_score = score;
        c
    }

    fn embeddings(pairs: &[(&str, Vec<f32>)]) -> HashMap<String, Vec<f32>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_lambda_one_preserves_relevance_order() {
        let input = vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.1)];
        let embs = embeddings(&[
            ("a", vec![1.0, 0.0]),
            ("b", vec![1.0, 0.0]),
            ("c", vec![0.0, 1.0]),
        ]);
        let ordered = mmr_order(input, 1.0, |id| embs.get(id).cloned());
        let ids: Vec<&str> = ordered.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_redundant_runner_up_demoted() {
        // b is nearly identical to a; c is orthogonal and only slightly
        // less relevant, so diversity promotes it to second place.
        let input = vec![candidate("a", 0.9), candidate("b", 0.8), candidate("c", 0.7)];
        let embs = embeddings(&[
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.99, 0.01]),
            ("c", vec![0.0, 1.0]),
        ]);
        let ordered = mmr_order(input, 0.5, |id| embs.get(id).cloned());
        let ids: Vec<&str> = ordered.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_missing_embeddings_incur_no_penalty() {
        let input = vec![candidate("a", 0.9), candidate("b", 0.8)];
        let ordered = mmr_order(input, 0.5, |_| None);
        let ids: Vec<&str> = ordered.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_short_inputs_pass_through() {
        assert!(mmr_order(vec![], 0.7, |_| None).is_empty());
        let one = mmr_order(vec![candidate("a", 0.5)], 0.7, |_| None);
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn test_flat_scores_keep_input_order() {
        let input = vec![candidate("a", 0.5), candidate("b", 0.5), candidate("c", 0.5)];
        let ordered = mmr_order(input, 1.0, |_| None);
        let ids: Vec<&str> = ordered.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
