use std::collections::HashMap;

use crate::config::{FusionConfig, FusionStrategy, MissingScorePolicy};
use crate::models::Candidate;
use crate::search::bm25::Bm25Hit;
use crate::search::vector::VectorHit;

/// Merge the lexical and vector ranked lists into one fused candidate list,
/// deduplicated by chunk id. A chunk present in both lists contributes once,
/// with both component scores and ranks retained.
///
/// Ordering: fused score descending, ties broken by vector rank, then BM25
/// rank, then chunk id, so the output is deterministic.
pub fn fuse(bm25: &[Bm25Hit], vector: &[VectorHit], config: &FusionConfig) -> Vec<Candidate> {
    let mut by_id: HashMap<String, Candidate> = HashMap::new();

    for (idx, hit) in bm25.iter().enumerate() {
        let candidate = by_id.entry(hit.chunk_id.clone()).or_insert_with(|| {
            let mut c = Candidate::bare(
                hit.chunk_id.clone(),
                hit.document_id.clone(),
                hit.text.clone(),
                hit.metadata.clone(),
            );
            c.highlights = hit.highlights.clone();
            c
        });
        candidate.bm25_score = Some(hit.score);
        candidate.rank_bm25 = Some(idx + 1);
    }

    for (idx, hit) in vector.iter().enumerate() {
        let candidate = by_id.entry(hit.chunk_id.clone()).or_insert_with(|| {
            Candidate::bare(
                hit.chunk_id.clone(),
                hit.document_id.clone(),
                hit.text.clone(),
                hit.metadata.clone(),
            )
        });
        candidate.vec_score = Some(hit.score);
        candidate.rank_vec = Some(idx + 1);
    }

    let mut candidates: Vec<Candidate> = by_id.into_values().collect();

    let bm25_scores: Vec<f32> = bm25.iter().map(|h| h.score).collect();
    let vec_scores: Vec<f32> = vector.iter().map(|h| h.score).collect();

    match effective_strategy(config.strategy, &bm25_scores, &vec_scores) {
        FusionStrategy::ZScore => {
            apply_zscore(&mut candidates, &bm25_scores, &vec_scores, config);
        }
        FusionStrategy::Rrf => apply_rrf(&mut candidates, config.rrf_c),
    }

    for candidate in &mut candidates {
        candidate.final_score = candidate.fused_score;
    }

    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| rank_key(a.rank_vec).cmp(&rank_key(b.rank_vec)))
            .then_with(|| rank_key(a.rank_bm25).cmp(&rank_key(b.rank_bm25)))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    candidates
}

/// Z-score fusion needs spread in at least one score pool; when every
/// non-empty pool is flat, fall back to rank-based RRF.
fn effective_strategy(
    configured: FusionStrategy,
    bm25_scores: &[f32],
    vec_scores: &[f32],
) -> FusionStrategy {
    if configured == FusionStrategy::Rrf {
        return FusionStrategy::Rrf;
    }
    let bm25_degenerate = pool_std(bm25_scores).1 == 0.0;
    let vec_degenerate = pool_std(vec_scores).1 == 0.0;
    if bm25_degenerate && vec_degenerate && !(bm25_scores.is_empty() && vec_scores.is_empty()) {
        FusionStrategy::Rrf
    } else {
        FusionStrategy::ZScore
    }
}

fn apply_zscore(
    candidates: &mut [Candidate],
    bm25_scores: &[f32],
    vec_scores: &[f32],
    config: &FusionConfig,
) {
    let bm25_stats = pool_std(bm25_scores);
    let vec_stats = pool_std(vec_scores);
    let bm25_min = pool_min_norm(bm25_scores, bm25_stats);
    let vec_min = pool_min_norm(vec_scores, vec_stats);

    for candidate in candidates.iter_mut() {
        let nb = match candidate.bm25_score {
            Some(s) => normalize(s, bm25_stats),
            None => missing_value(config.missing_score, bm25_min),
        };
        let nv = match candidate.vec_score {
            Some(s) => normalize(s, vec_stats),
            None => missing_value(config.missing_score, vec_min),
        };
        candidate.fused_score = config.bm25_weight * nb + config.vec_weight * nv;
    }
}

fn apply_rrf(candidates: &mut [Candidate], rrf_c: f32) {
    for candidate in candidates.iter_mut() {
        let mut score = 0.0f32;
        if let Some(rank) = candidate.rank_bm25 {
            score += 1.0 / (rrf_c + rank as f32);
        }
        if let Some(rank) = candidate.rank_vec {
            score += 1.0 / (rrf_c + rank as f32);
        }
        candidate.fused_score = score;
    }
}

/// Population mean and standard deviation of a score pool.
fn pool_std(scores: &[f32]) -> (f32, f32) {
    if scores.is_empty() {
        return (0.0, 0.0);
    }
    let n = scores.len() as f32;
    let mean = scores.iter().sum::<f32>() / n;
    let variance = scores.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / n;
    (mean, variance.sqrt())
}

fn normalize(score: f32, (mean, std): (f32, f32)) -> f32 {
    if std == 0.0 {
        0.0
    } else {
        (score - mean) / std
    }
}

/// The pool's minimum normalized value; 0.0 for an empty or flat pool.
fn pool_min_norm(scores: &[f32], stats: (f32, f32)) -> f32 {
    scores
        .iter()
        .map(|s| normalize(*s, stats))
        .fold(0.0f32, f32::min)
}

fn missing_value(policy: MissingScorePolicy, pool_min: f32) -> f32 {
    match policy {
        MissingScorePolicy::PoolMin => pool_min,
        MissingScorePolicy::Zero => 0.0,
    }
}

fn rank_key(rank: Option<usize>) -> usize {
    rank.unwrap_or(usize::MAX)
}
