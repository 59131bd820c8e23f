use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Which retrieval backend a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Lexical,
    Vector,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Lexical => write!(f, "lexical"),
            Backend::Vector => write!(f, "vector"),
        }
    }
}

/// Error taxonomy for the retrieval engine.
///
/// Sub-search and rerank failures are recovered locally with a degraded
/// fallback; only `RetrievalUnavailable` propagates to the caller.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// One sub-search backend is unreachable. Fatal for that leg only.
    #[error("{backend} search backend unavailable: {reason}")]
    BackendUnavailable { backend: Backend, reason: String },

    /// Both the lexical and vector backends failed for this query.
    #[error("retrieval unavailable: both lexical and vector backends failed")]
    RetrievalUnavailable,

    /// The cross-encoder endpoint could not score the candidates.
    #[error("reranker unavailable: {0}")]
    RerankUnavailable(String),

    /// The cross-encoder call exceeded its stage timeout.
    #[error("reranker timed out after {0:?}")]
    RerankTimeout(Duration),

    /// Rejected at construction time, never at query time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl RetrievalError {
    pub fn backend(backend: Backend, reason: impl Into<String>) -> Self {
        RetrievalError::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }
}
