use std::collections::{HashMap, HashSet};

use crate::config::SelectConfig;
use crate::models::Candidate;

/// Pick the final `k_final` results from the boosted candidate list.
///
/// The per-method champions (best reranked, BM25 rank 1, vector rank 1) are
/// seeded first so fusion can never bury a chunk one retrieval method is
/// certain about. Protected seats still count toward the per-document cap
/// and are skipped when negatively scored or near-duplicate of an already
/// selected chunk. The remaining seats fill greedily by final score, under
/// dedup and the cap; output is sorted by final score descending.
pub fn select_top(candidates: &[Candidate], k_final: usize, config: &SelectConfig) -> Vec<Candidate> {
    if k_final == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let protected = protected_ids(candidates);
    let mut selected: Vec<Candidate> = Vec::new();
    let mut doc_counts: HashMap<&str, usize> = HashMap::new();

    let protected_pass = candidates.iter().filter(|c| protected.contains(&c.chunk_id));
    let regular_pass = candidates.iter().filter(|c| !protected.contains(&c.chunk_id));

    for candidate in protected_pass {
        if candidate.final_score < 0.0 || is_duplicate(candidate, &selected, config.dedup_threshold)
        {
            continue;
        }
        *doc_counts.entry(candidate.document_id.as_str()).or_default() += 1;
        selected.push(candidate.clone());
    }

    for candidate in regular_pass {
        if selected.len() >= k_final {
            break;
        }
        let doc_count = doc_counts
            .get(candidate.document_id.as_str())
            .copied()
            .unwrap_or(0);
        let cap_ok = doc_count < config.per_doc_cap
            || (config.cap_exception_relevant
                && candidate.final_score >= config.cap_exception_threshold);
        if !cap_ok || is_duplicate(candidate, &selected, config.dedup_threshold) {
            continue;
        }
        *doc_counts.entry(candidate.document_id.as_str()).or_default() += 1;
        selected.push(candidate.clone());
    }

    selected.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    // Protected seats can overshoot only when k_final < 3.
    selected.truncate(k_final);
    selected
}

/// Drop every candidate whose text is a near-duplicate of an earlier,
/// higher-ranked one. Applying this twice changes nothing.
pub fn dedup(candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !is_duplicate(&candidate, &kept, threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn is_duplicate(candidate: &Candidate, selected: &[Candidate], threshold: f32) -> bool {
    selected
        .iter()
        .any(|s| shingle_jaccard(&candidate.text, &s.text) >= threshold)
}

fn protected_ids(candidates: &[Candidate]) -> HashSet<String> {
    let mut ids = HashSet::new();
    if let Some(best) = candidates
        .iter()
        .filter(|c| c.rerank_score.is_some())
        .max_by(|a, b| {
            a.rerank_score
                .partial_cmp(&b.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    {
        ids.insert(best.chunk_id.clone());
    }
    for candidate in candidates {
        if candidate.rank_bm25 == Some(1) || candidate.rank_vec == Some(1) {
            ids.insert(candidate.chunk_id.clone());
        }
    }
    ids
}

/// Jaccard similarity over 3-word shingles, case-insensitive. Texts shorter
/// than one shingle compare as whole strings.
pub fn shingle_jaccard(a: &str, b: &str) -> f32 {
    let sa = shingles(a);
    let sb = shingles(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.len() + sb.len() - intersection;
    intersection as f32 / union as f32
}

fn shingles(text: &str) -> HashSet<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    if words.is_empty() {
        return HashSet::new();
    }
    if words.len() < 3 {
        return HashSet::from([words.join(" ")]);
    }
    words.windows(3).map(|w| w.join(" ")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn candidate(id: &str, doc: &str, text: &str, score: f32) -> Candidate {
        let mut c = Candidate::bare(
            id.to_string(),
            doc.to_string(),
            text.to_string(),
            ChunkMetadata::default(),
        );
        c.fused_score = score;
        c.final_score = score;
        c
    }

    fn distinct_text(i: usize) -> String {
        format!("section {i} covers topic number {i} in depth with details {i}")
    }

    #[test]
    fn test_never_returns_more_than_k() {
        let candidates: Vec<Candidate> = (0..20)
            .map(|i| candidate(&format!("c{i}"), &format!("d{i}"), &distinct_text(i), 1.0 - i as f32 * 0.01))
            .collect();
        let selected = select_top(&candidates, 8, &SelectConfig::default());
        assert_eq!(selected.len(), 8);
    }

    #[test]
    fn test_per_doc_cap_limits_single_document() {
        // Five chunks, one document: exactly three survive.
        let candidates: Vec<Candidate> = (0..5)
            .map(|i| candidate(&format!("c{i}"), "only.pdf", &distinct_text(i), 1.0 - i as f32 * 0.1))
            .collect();
        let selected = select_top(&candidates, 8, &SelectConfig::default());
        assert_eq!(selected.len(), 3);
        assert!(selected.iter().all(|c| c.document_id == "only.pdf"));
    }

    #[test]
    fn test_cap_exception_admits_highly_relevant() {
        let config = SelectConfig {
            cap_exception_relevant: true,
            ..Default::default()
        };
        let candidates: Vec<Candidate> = (0..5)
            .map(|i| candidate(&format!("c{i}"), "only.pdf", &distinct_text(i), 0.95 - i as f32 * 0.01))
            .collect();
        // All above the 0.9 exception threshold, so the cap never bites.
        let selected = select_top(&candidates, 8, &config);
        assert_eq!(selected.len(), 5);
    }

    #[test]
    fn test_dedup_drops_near_identical_text() {
        let shared = "the badge pickup desk opens at eight in the main lobby area";
        let candidates = vec![
            candidate("a", "d1", shared, 0.9),
            candidate("b", "d2", shared, 0.8),
            candidate("c", "d3", &distinct_text(7), 0.7),
        ];
        let selected = select_top(&candidates, 8, &SelectConfig::default());
        let ids: Vec<&str> = selected.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let shared = "welcome packet contents and badge pickup instructions for day one";
        let candidates = vec![
            candidate("a", "d1", shared, 0.9),
            candidate("b", "d2", shared, 0.8),
            candidate("c", "d3", &distinct_text(3), 0.7),
        ];
        let once = dedup(candidates, 0.8);
        let twice = dedup(once.clone(), 0.8);
        let once_ids: Vec<&str> = once.iter().map(|c| c.chunk_id.as_str()).collect();
        let twice_ids: Vec<&str> = twice.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(once_ids, twice_ids);
    }

    #[test]
    fn test_method_champions_survive_low_fused_scores() {
        // The vector champion sits far down the boosted list but must still
        // make the final cut when k allows.
        let mut low = candidate("vec-top", "dv", &distinct_text(1), 0.01);
        low.rank_vec = Some(1);
        let mut candidates: Vec<Candidate> = (0..10)
            .map(|i| candidate(&format!("c{i}"), &format!("d{i}"), &distinct_text(i + 2), 0.9 - i as f32 * 0.05))
            .collect();
        candidates.push(low);

        let selected = select_top(&candidates, 3, &SelectConfig::default());
        assert!(selected.iter().any(|c| c.chunk_id == "vec-top"));
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_negative_champion_is_not_forced_in() {
        let mut bad = candidate("bm25-top", "db", &distinct_text(1), -0.5);
        bad.rank_bm25 = Some(1);
        let good = candidate("g", "dg", &distinct_text(2), 0.9);
        let selected = select_top(&[good, bad], 2, &SelectConfig::default());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].chunk_id, "g");
    }

    #[test]
    fn test_protected_count_toward_cap() {
        let mut champ = candidate("c0", "only.pdf", &distinct_text(0), 0.95);
        champ.rank_bm25 = Some(1);
        let mut candidates = vec![champ];
        candidates.extend((1..5).map(|i| {
            candidate(&format!("c{i}"), "only.pdf", &distinct_text(i), 0.9 - i as f32 * 0.1)
        }));
        let selected = select_top(&candidates, 8, &SelectConfig::default());
        // Champion plus two more from the same document, no fourth.
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_output_sorted_by_final_score() {
        let mut champ = candidate("low-champ", "dv", &distinct_text(1), 0.1);
        champ.rank_vec = Some(1);
        let candidates = vec![
            champ,
            candidate("hi", "dh", &distinct_text(2), 0.9),
            candidate("mid", "dm", &distinct_text(3), 0.5),
        ];
        let selected = select_top(&candidates, 3, &SelectConfig::default());
        let ids: Vec<&str> = selected.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["hi", "mid", "low-champ"]);
    }

    #[test]
    fn test_shingle_jaccard_bounds() {
        assert_eq!(shingle_jaccard("", ""), 1.0);
        assert_eq!(shingle_jaccard("some words here", ""), 0.0);
        assert!((shingle_jaccard("a b c d", "a b c d") - 1.0).abs() < 1e-6);
        assert!(shingle_jaccard("a b c d e", "x y z w v") < 1e-6);
    }
}
