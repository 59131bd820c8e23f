use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RerankConfig;
use crate::error::RetrievalError;
use crate::models::Candidate;

/// Scores query/passage pairs with a cross-encoder. Abstracted behind a
/// trait so tests can inject a deterministic scorer and deployments can
/// swap the HTTP client for an in-process model.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Return one relevance score in [0, 1] per input text, same order.
    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, RetrievalError>;
}

/// Cross-encoder client for an OpenAI-compatible `/v1/rerank` endpoint
/// (llama.cpp server, TEI, vLLM and friends all speak this shape).
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankEntry>,
}

#[derive(Deserialize)]
struct RerankEntry {
    index: usize,
    relevance_score: f32,
}

impl HttpCrossEncoder {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &RerankConfig) -> Option<Self> {
        let base_url = config.base_url.as_deref()?;
        let model = config.model.as_deref().unwrap_or("reranker");
        Some(Self::new(base_url, model))
    }
}

#[async_trait]
impl RelevanceScorer for HttpCrossEncoder {
    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, RetrievalError> {
        let request = RerankRequest {
            model: &self.model,
            query,
            documents: texts,
            top_n: texts.len(),
        };

        let response = self
            .client
            .post(format!("{}/v1/rerank", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::RerankUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RetrievalError::RerankUnavailable(format!(
                "rerank endpoint returned {}",
                response.status()
            )));
        }

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::RerankUnavailable(e.to_string()))?;

        // Results come back sorted by relevance; realign by index. Raw
        // scores are logits, squash into [0, 1].
        let mut scores = vec![0.0f32; texts.len()];
        for entry in body.results {
            if entry.index < scores.len() {
                scores[entry.index] = sigmoid(entry.relevance_score);
            }
        }
        Ok(scores)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Rerank the head of the fused list. The top `preselect_topn` candidates
/// are rescored and reordered by cross-encoder relevance; the tail keeps
/// its fused order and follows the head unchanged.
///
/// Timeouts and transport failures surface as errors here; the pipeline
/// decides whether to degrade to the fused ordering.
pub async fn rerank_candidates(
    scorer: &dyn RelevanceScorer,
    query: &str,
    mut candidates: Vec<Candidate>,
    config: &RerankConfig,
) -> Result<Vec<Candidate>, RetrievalError> {
    let head_len = candidates.len().min(config.preselect_topn);
    if head_len == 0 {
        return Ok(candidates);
    }

    let texts: Vec<String> = candidates[..head_len]
        .iter()
        .map(|c| c.text.clone())
        .collect();

    let scores = tokio::time::timeout(
        Duration::from_secs(config.timeout_secs),
        scorer.score_batch(query, &texts),
    )
    .await
    .map_err(|_| RetrievalError::RerankTimeout(Duration::from_secs(config.timeout_secs)))??;

    if scores.len() != head_len {
        return Err(RetrievalError::RerankUnavailable(format!(
            "expected {} scores, got {}",
            head_len,
            scores.len()
        )));
    }

    let tail = candidates.split_off(head_len);
    for (candidate, score) in candidates.iter_mut().zip(&scores) {
        candidate.rerank_score = Some(*score);
        candidate.final_score = *score;
    }

    candidates.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.fused_score
                    .partial_cmp(&a.fused_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    candidates.extend(tail);
    Ok(candidates)
}
