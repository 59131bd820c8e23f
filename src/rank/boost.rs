use std::collections::HashSet;

use crate::config::BoostWeights;
use crate::models::Candidate;

/// Candidates within this many positions of the list head are checked for
/// adjacent-chunk neighbors.
const NEIGHBOR_WINDOW: usize = 10;

/// Common terms excluded from lexical overlap and title matching so that
/// "what is the ..." queries don't boost every chunk containing "the".
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "my", "of", "on", "or", "that", "the", "this", "to", "was", "what",
    "when", "where", "which", "who", "will", "with", "you", "your",
];

/// Deterministic per-candidate feature boosts, added on top of the rerank
/// score when present, otherwise the fused score. Reorders the list by the
/// boosted final score, keeping every unreranked candidate below the
/// reranked head.
pub fn apply_boosts(candidates: &mut [Candidate], query: &str, weights: &BoostWeights) {
    let query_terms = content_terms(query);

    // Snapshot (document, position) pairs near the head before mutating, so
    // the neighbor feature sees the pre-boost ordering.
    let window: Vec<(String, usize)> = candidates
        .iter()
        .take(NEIGHBOR_WINDOW)
        .map(|c| (c.document_id.clone(), c.metadata.position))
        .collect();

    for (idx, candidate) in candidates.iter_mut().enumerate() {
        let lexical = lexical_overlap(&query_terms, &candidate.text);
        let title = title_match(&query_terms, candidate.metadata.title.as_deref());
        let position = 1.0 / (1.0 + candidate.metadata.position as f32);
        let neighbor = if idx < NEIGHBOR_WINDOW && has_adjacent_neighbor(candidate, idx, &window) {
            1.0
        } else {
            0.0
        };

        candidate.boost_score = weights.lexical * lexical
            + weights.title * title
            + weights.position * position
            + weights.neighbor * neighbor;

        let base = candidate.rerank_score.unwrap_or(candidate.fused_score);
        candidate.final_score = base + candidate.boost_score;
    }

    // Reranked candidates score on the cross-encoder's [0, 1] scale while
    // the unreranked tail keeps the fused scale. Cap the tail just under
    // the reranked minimum so it cannot outrank the head here or in any
    // later stage that sorts by final score.
    let head_floor = candidates
        .iter()
        .filter(|c| c.rerank_score.is_some())
        .map(|c| c.final_score)
        .fold(f32::INFINITY, f32::min);
    if head_floor.is_finite() {
        for candidate in candidates.iter_mut().filter(|c| c.rerank_score.is_none()) {
            candidate.final_score = candidate.final_score.min(head_floor - 1e-6);
        }
    }

    candidates.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Fraction of the query's content terms that appear in the text, 0.0 when
/// the query is all stopwords.
fn lexical_overlap(query_terms: &HashSet<String>, text: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = content_terms(text);
    let hits = query_terms.intersection(&text_terms).count();
    hits as f32 / query_terms.len() as f32
}

fn title_match(query_terms: &HashSet<String>, title: Option<&str>) -> f32 {
    let Some(title) = title else {
        return 0.0;
    };
    let title_terms = content_terms(title);
    if query_terms.iter().any(|t| title_terms.contains(t)) {
        1.0
    } else {
        0.0
    }
}

/// Another candidate in the head window holds the adjacent chunk of the
/// same document: a strong signal the passage continues.
fn has_adjacent_neighbor(candidate: &Candidate, idx: usize, window: &[(String, usize)]) -> bool {
    let position = candidate.metadata.position;
    window.iter().enumerate().any(|(other_idx, (doc, pos))| {
        other_idx != idx
            && *doc == candidate.document_id
            && (pos.abs_diff(position)) == 1
    })
}

fn content_terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}
