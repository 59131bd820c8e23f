use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::models::{Chunk, RankedResult, SearchFilters};
use crate::rank::rerank::{rerank_candidates, HttpCrossEncoder, RelevanceScorer};
use crate::rank::{boost, fusion, mmr, select};
use crate::search::bm25::Bm25Index;
use crate::search::vector::VectorStore;

/// One retrieval request. The embedding is computed by the caller with the
/// same model used at ingestion; an empty embedding degrades the query to
/// lexical-only.
#[derive(Debug, Clone, Default)]
pub struct RetrievalQuery {
    pub text: String,
    pub embedding: Vec<f32>,
    pub filters: SearchFilters,
}

/// Per-query diagnostics, surfaced alongside the results so callers can log
/// or expose degradation without parsing log output.
#[derive(Debug, Clone, Default)]
pub struct RetrievalReport {
    pub bm25_candidates: usize,
    pub vector_candidates: usize,
    pub fused_candidates: usize,
    pub bm25_failed: bool,
    pub vector_failed: bool,
    pub rerank_degraded: bool,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct RetrievalOutcome {
    pub results: Vec<RankedResult>,
    pub report: RetrievalReport,
}

/// The full ranking pipeline: two retrieval legs, fusion, optional
/// cross-encoder rerank, feature boosts, protected-top selection, optional
/// MMR. Construction validates the config so queries never see a bad one.
pub struct RetrievalPipeline {
    config: RetrievalConfig,
    bm25: Arc<Bm25Index>,
    vectors: Arc<VectorStore>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
}

impl RetrievalPipeline {
    /// Build a pipeline over existing stores. When reranking is enabled and
    /// the config names an endpoint, an HTTP cross-encoder is wired in;
    /// otherwise reranking is skipped at query time.
    pub fn new(
        config: RetrievalConfig,
        bm25: Arc<Bm25Index>,
        vectors: Arc<VectorStore>,
    ) -> Result<Self, RetrievalError> {
        config.validate()?;
        let scorer: Option<Arc<dyn RelevanceScorer>> = if config.rerank.enabled {
            HttpCrossEncoder::from_config(&config.rerank)
                .map(|s| Arc::new(s) as Arc<dyn RelevanceScorer>)
        } else {
            None
        };
        Ok(Self {
            config,
            bm25,
            vectors,
            scorer,
        })
    }

    /// Replace the relevance scorer, mainly for tests and in-process models.
    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Index a batch of chunks in both legs.
    pub fn ingest(&self, chunks: &[Chunk]) -> Result<(), RetrievalError> {
        self.bm25.index_chunks(chunks)?;
        self.vectors.add_chunks(chunks)
    }

    /// Remove a document from both legs, ahead of re-ingestion.
    pub fn delete_document(&self, document_id: &str) -> Result<(), RetrievalError> {
        self.bm25.delete_document(document_id)?;
        self.vectors.delete_document(document_id)
    }

    /// Run the full pipeline for one query.
    ///
    /// A single failed retrieval leg degrades gracefully; both legs failing
    /// is `RetrievalUnavailable`. Rerank failures and timeouts fall back to
    /// the fused ordering and are flagged in the report.
    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<RetrievalOutcome, RetrievalError> {
        let started = Instant::now();
        let mut report = RetrievalReport::default();

        // The lexical leg hits disk through tantivy; keep it off the async
        // runtime threads.
        let bm25 = Arc::clone(&self.bm25);
        let query_text = query.text.clone();
        let filters = query.filters.clone();
        let k_bm25 = self.config.k_bm25;
        let bm25_task = tokio::task::spawn_blocking(move || {
            bm25.search(&query_text, k_bm25, &filters)
        });

        let vector_result =
            self.vectors
                .search(&query.embedding, self.config.k_vec, &query.filters);

        let bm25_hits = match bm25_task.await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(error = %e, "lexical leg failed, continuing vector-only");
                report.bm25_failed = true;
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "lexical task aborted, continuing vector-only");
                report.bm25_failed = true;
                Vec::new()
            }
        };
        let vector_hits = match vector_result {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector leg failed, continuing lexical-only");
                report.vector_failed = true;
                Vec::new()
            }
        };
        if report.bm25_failed && report.vector_failed {
            return Err(RetrievalError::RetrievalUnavailable);
        }
        report.bm25_candidates = bm25_hits.len();
        report.vector_candidates = vector_hits.len();

        let mut candidates = fusion::fuse(&bm25_hits, &vector_hits, &self.config.fusion);
        report.fused_candidates = candidates.len();

        if self.config.rerank.enabled && !candidates.is_empty() {
            match &self.scorer {
                Some(scorer) => {
                    match rerank_candidates(
                        scorer.as_ref(),
                        &query.text,
                        candidates.clone(),
                        &self.config.rerank,
                    )
                    .await
                    {
                        Ok(reranked) => candidates = reranked,
                        Err(e) => {
                            warn!(error = %e, "rerank failed, keeping fused order");
                            report.rerank_degraded = true;
                        }
                    }
                }
                None => {
                    warn!("reranking enabled but no scorer configured, keeping fused order");
                    report.rerank_degraded = true;
                }
            }
        }

        boost::apply_boosts(&mut candidates, &query.text, &self.config.boost);

        let mut selected =
            select::select_top(&candidates, self.config.k_final, &self.config.select);

        if self.config.mmr.enabled {
            selected = mmr::mmr_order(selected, self.config.mmr.lambda, |id| {
                self.vectors.embedding_of(id)
            });
        }

        report.elapsed = started.elapsed();
        info!(
            bm25 = report.bm25_candidates,
            vector = report.vector_candidates,
            fused = report.fused_candidates,
            returned = selected.len(),
            degraded = report.bm25_failed || report.vector_failed || report.rerank_degraded,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "retrieval complete"
        );

        Ok(RetrievalOutcome {
            results: selected.iter().map(RankedResult::from).collect(),
            report,
        })
    }
}
