//! Hybrid retrieval and ranking engine for a knowledge-base chat bot.
//!
//! Given a query (text plus a precomputed embedding), the engine runs a
//! lexical BM25 leg and a vector similarity leg over an ingested chunk
//! corpus, then ranks the merged pool:
//!
//! ```text
//! query ──► bm25 ─┐
//!                 ├─► fusion ─► rerank ─► boosts ─► select ─► (mmr) ─► results
//! query ──► vector┘
//! ```
//!
//! Fusion z-score normalizes each leg's scores and takes a weighted sum,
//! falling back to reciprocal rank fusion when the distributions are flat.
//! An optional cross-encoder reranks the head of the fused list; small
//! deterministic feature boosts correct for term overlap, titles, and chunk
//! position; selection guarantees each retrieval method's champion a seat,
//! deduplicates near-identical text, and caps chunks per document. MMR
//! diversity reordering is available behind a config switch.
//!
//! Every stage degrades rather than fails: one dead retrieval leg, a
//! reranker timeout, or a missing embedding all produce results, with the
//! degradation recorded in [`pipeline::RetrievalReport`].

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod rank;
pub mod search;

pub use config::RetrievalConfig;
pub use error::RetrievalError;
pub use models::{Chunk, ChunkMetadata, RankedResult, SearchFilters};
pub use pipeline::{RetrievalOutcome, RetrievalPipeline, RetrievalQuery};
