use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// How the two ranked lists are merged into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Z-score normalize each pool, then weighted sum.
    ZScore,
    /// Reciprocal rank fusion. Also used automatically when the score
    /// distributions are degenerate.
    Rrf,
}

/// How a chunk absent from one ranked list is scored in z-score fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingScorePolicy {
    /// Use the pool's minimum normalized value, so absence is penalized but
    /// not catastrophically.
    PoolMin,
    /// Use 0.0 (the pool mean).
    Zero,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub strategy: FusionStrategy,
    pub bm25_weight: f32,
    pub vec_weight: f32,
    /// RRF constant `c` in `1 / (c + rank)`.
    pub rrf_c: f32,
    pub missing_score: MissingScorePolicy,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::ZScore,
            bm25_weight: 0.2,
            vec_weight: 0.8,
            rrf_c: 15.0,
            missing_score: MissingScorePolicy::PoolMin,
        }
    }
}

/// Cross-encoder reranker settings. `base_url = None` with `enabled = true`
/// means a scorer must be injected at pipeline construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub enabled: bool,
    /// Base URL of an OpenAI-compatible `/v1/rerank` endpoint.
    pub base_url: Option<String>,
    /// Model identifier, opaque to the engine.
    pub model: Option<String>,
    /// How many fused candidates compete for reranked slots.
    pub preselect_topn: usize,
    /// Stage timeout; on expiry the fused ordering is kept.
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            model: None,
            preselect_topn: 50,
            timeout_secs: 10,
        }
    }
}

/// Weights for the feature boost layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostWeights {
    pub lexical: f32,
    pub title: f32,
    pub position: f32,
    pub neighbor: f32,
}

impl Default for BoostWeights {
    fn default() -> Self {
        Self {
            lexical: 0.20,
            title: 0.10,
            position: 0.08,
            neighbor: 0.05,
        }
    }
}

/// Protected-top selection, dedup, and per-document capping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectConfig {
    /// Maximum chunks per source document in the final set.
    pub per_doc_cap: usize,
    /// Allow exceeding the cap for candidates above `cap_exception_threshold`.
    pub cap_exception_relevant: bool,
    pub cap_exception_threshold: f32,
    /// Shingle-Jaccard similarity above which two chunks count as duplicates.
    pub dedup_threshold: f32,
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self {
            per_doc_cap: 3,
            cap_exception_relevant: false,
            cap_exception_threshold: 0.9,
            dedup_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmrConfig {
    pub enabled: bool,
    /// Relevance weight; `1.0` disables the diversity term.
    pub lambda: f32,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lambda: 0.7,
        }
    }
}

/// Full configuration surface of the ranking engine. Built once, validated
/// at construction, and passed into each component explicitly so per-query
/// overrides and deterministic tests stay possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub k_bm25: usize,
    pub k_vec: usize,
    pub k_final: usize,
    pub fusion: FusionConfig,
    pub rerank: RerankConfig,
    pub boost: BoostWeights,
    pub select: SelectConfig,
    pub mmr: MmrConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_bm25: 30,
            k_vec: 30,
            k_final: 8,
            fusion: FusionConfig::default(),
            rerank: RerankConfig::default(),
            boost: BoostWeights::default(),
            select: SelectConfig::default(),
            mmr: MmrConfig::default(),
        }
    }
}

impl RetrievalConfig {
    /// Load overrides from `KB_RETRIEVAL_*` environment variables on top of
    /// the defaults. Call `validate` afterwards.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("KB_RETRIEVAL_K_BM25") {
            config.k_bm25 = v;
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_K_VEC") {
            config.k_vec = v;
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_K_FINAL") {
            config.k_final = v;
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_BM25_WEIGHT") {
            config.fusion.bm25_weight = v;
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_VEC_WEIGHT") {
            config.fusion.vec_weight = v;
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_RRF_C") {
            config.fusion.rrf_c = v;
        }
        if let Ok(v) = std::env::var("KB_RETRIEVAL_FUSION") {
            if v.eq_ignore_ascii_case("rrf") {
                config.fusion.strategy = FusionStrategy::Rrf;
            } else if v.eq_ignore_ascii_case("zscore") {
                config.fusion.strategy = FusionStrategy::ZScore;
            }
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_USE_RERANK") {
            config.rerank.enabled = v;
        }
        if let Ok(url) = std::env::var("KB_RETRIEVAL_RERANKER_URL") {
            config.rerank.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("KB_RETRIEVAL_RERANKER_MODEL") {
            config.rerank.model = Some(model);
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_PRESELECT_TOPN") {
            config.rerank.preselect_topn = v;
        }
        if let Some(v) = env_parse::<u64>("KB_RETRIEVAL_RERANK_TIMEOUT_SECS") {
            config.rerank.timeout_secs = v.min(30);
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_PER_DOC_CAP") {
            config.select.per_doc_cap = v;
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_CAP_EXCEPTION_RELEVANT") {
            config.select.cap_exception_relevant = v;
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_MMR_ENABLED") {
            config.mmr.enabled = v;
        }
        if let Some(v) = env_parse("KB_RETRIEVAL_MMR_LAMBDA") {
            config.mmr.lambda = v;
        }

        config
    }

    /// Fail fast on impossible settings so query time never sees them.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.fusion.bm25_weight < 0.0 || self.fusion.vec_weight < 0.0 {
            return Err(RetrievalError::InvalidConfiguration(
                "fusion weights must be non-negative".to_string(),
            ));
        }
        if self.fusion.bm25_weight + self.fusion.vec_weight <= 0.0 {
            return Err(RetrievalError::InvalidConfiguration(
                "fusion weights must sum to a positive number".to_string(),
            ));
        }
        if self.fusion.rrf_c <= 0.0 {
            return Err(RetrievalError::InvalidConfiguration(
                "rrf_c must be positive".to_string(),
            ));
        }
        if self.rerank.enabled && self.k_final > self.rerank.preselect_topn {
            return Err(RetrievalError::InvalidConfiguration(format!(
                "k_final ({}) must not exceed preselect_topn ({}) when reranking is enabled",
                self.k_final, self.rerank.preselect_topn
            )));
        }
        if self.select.per_doc_cap == 0 {
            return Err(RetrievalError::InvalidConfiguration(
                "per_doc_cap must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.select.dedup_threshold) {
            return Err(RetrievalError::InvalidConfiguration(
                "dedup_threshold must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mmr.lambda) {
            return Err(RetrievalError::InvalidConfiguration(
                "mmr lambda must be in [0, 1]".to_string(),
            ));
        }
        let b = &self.boost;
        if b.lexical < 0.0 || b.title < 0.0 || b.position < 0.0 || b.neighbor < 0.0 {
            return Err(RetrievalError::InvalidConfiguration(
                "boost weights must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RetrievalConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_tuning_values() {
        let config = RetrievalConfig::default();
        assert_eq!(config.fusion.bm25_weight, 0.2);
        assert_eq!(config.fusion.vec_weight, 0.8);
        assert_eq!(config.fusion.rrf_c, 15.0);
        assert_eq!(config.rerank.preselect_topn, 50);
        assert_eq!(config.select.per_doc_cap, 3);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = RetrievalConfig::default();
        config.fusion.bm25_weight = -0.1;
        assert!(matches!(
            config.validate(),
            Err(RetrievalError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_weight_sum_rejected() {
        let mut config = RetrievalConfig::default();
        config.fusion.bm25_weight = 0.0;
        config.fusion.vec_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_weights_need_not_sum_to_one() {
        let mut config = RetrievalConfig::default();
        config.fusion.bm25_weight = 1.5;
        config.fusion.vec_weight = 2.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_k_final_above_preselect_rejected_when_reranking() {
        let mut config = RetrievalConfig::default();
        config.k_final = 100;
        config.rerank.preselect_topn = 50;
        assert!(config.validate().is_err());

        // Fine once reranking is off
        config.rerank.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lambda_out_of_range_rejected() {
        let mut config = RetrievalConfig::default();
        config.mmr.lambda = 1.2;
        assert!(config.validate().is_err());
    }
}
